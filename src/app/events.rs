//! Application events for the event-driven architecture

use serde::{Deserialize, Serialize};

/// Events that can occur in the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// A new session was created
    SessionCreated {
        session_id: String,
    },

    /// A session's history was cleared
    SessionCleared {
        session_id: String,
    },

    /// Idle sessions were dropped
    SessionsPruned {
        count: usize,
    },

    /// A user message was handed to the model
    MessageSent {
        session_id: String,
    },

    /// The model produced a reply
    ReplyGenerated {
        session_id: String,
        input_tokens: u32,
        output_tokens: u32,
    },

    /// The model call failed and the apology reply was shown instead
    GenerationFailed {
        session_id: String,
        error: String,
    },

    /// An application error occurred
    Error {
        error: String,
    },

    /// Application shutdown requested
    Shutdown,
}
