//! Errors surfaced to the presentation layer

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message is too long ({len} characters, limit is {limit})")]
    MessageTooLong { len: usize, limit: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("A reply is still being generated for this session")]
    Busy,

    #[error("Failed to load the chatbot model: {0}")]
    ModelUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ChatResult<T> = Result<T, ChatError>;
