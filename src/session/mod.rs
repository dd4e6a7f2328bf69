//! Session management and conversation handling
//!
//! This module tracks, per browser session, the displayed conversation and
//! the token history fed back to the model. Nothing is persisted.

mod conversation;
mod store;

pub use conversation::*;
pub use store::*;
