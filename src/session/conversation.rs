//! Per-session conversation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::ModelContext;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Bot => "AI",
        }
    }
}

/// One utterance in the displayed history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub utterance: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(speaker: Speaker, utterance: impl Into<String>) -> Self {
        Self {
            speaker,
            utterance: utterance.into(),
            timestamp: Utc::now(),
        }
    }
}

/// How the model side of an exchange ended
#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    /// The model answered; `context` is the new running token history.
    Generated { reply: String, context: ModelContext },
    /// Generation failed; the reply is shown to the user and the token
    /// history starts over on the next turn.
    Failed { reply: String },
}

impl ReplyOutcome {
    pub fn reply(&self) -> &str {
        match self {
            ReplyOutcome::Generated { reply, .. } | ReplyOutcome::Failed { reply } => reply,
        }
    }
}

/// Conversation statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub bot_messages: usize,
    pub exchanges: u64,
    pub context_tokens: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Displayed history plus the model-side token history of one session.
///
/// Turns always come in user/bot pairs: an exchange is recorded as a whole
/// or not at all.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    context: Option<ModelContext>,
    exchange_count: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the user utterance followed by the model reply.
    pub fn record_exchange(&mut self, user_text: impl Into<String>, outcome: ReplyOutcome) {
        self.turns.push(Turn::new(Speaker::User, user_text));
        match outcome {
            ReplyOutcome::Generated { reply, context } => {
                self.turns.push(Turn::new(Speaker::Bot, reply));
                self.context = Some(context);
            }
            ReplyOutcome::Failed { reply } => {
                self.turns.push(Turn::new(Speaker::Bot, reply));
                self.context = None;
            }
        }
        self.exchange_count += 1;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.context = None;
        self.exchange_count = 0;
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn context(&self) -> Option<&ModelContext> {
        self.context.as_ref()
    }

    pub fn exchange_count(&self) -> u64 {
        self.exchange_count
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn stats(&self) -> ConversationStats {
        let user_messages = self
            .turns
            .iter()
            .filter(|t| t.speaker == Speaker::User)
            .count();

        ConversationStats {
            total_messages: self.turns.len(),
            user_messages,
            bot_messages: self.turns.len() - user_messages,
            exchanges: self.exchange_count,
            context_tokens: self.context.as_ref().map_or(0, ModelContext::len),
            last_activity: self.turns.last().map(|t| t.timestamp),
        }
    }
}
