//! Generation backends
//!
//! This module wraps pretrained dialogue models behind a single
//! `LlmProvider` interface. A provider receives the new user utterance and
//! the running token history, and hands back the decoded reply together with
//! the extended history.

pub mod provider;
pub mod types;
pub mod errors;
pub mod echo;
pub mod ollama;
#[cfg(feature = "local-model")]
pub mod dialogpt;

pub use provider::*;
pub use types::*;
pub use errors::*;
