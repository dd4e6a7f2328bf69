//! Canned conversation openers offered next to the chat input

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Starter {
    pub topic: &'static str,
    pub prompt: &'static str,
}

const STARTERS: &[Starter] = &[
    Starter {
        topic: "General Chat",
        prompt: "Hello! How are you doing today?",
    },
    Starter {
        topic: "Technology",
        prompt: "What do you think about the future of artificial intelligence?",
    },
    Starter {
        topic: "Science",
        prompt: "Can you explain quantum computing in simple terms?",
    },
    Starter {
        topic: "Philosophy",
        prompt: "What do you think is the meaning of life?",
    },
    Starter {
        topic: "Creative Writing",
        prompt: "Can you help me write a short story about space exploration?",
    },
    Starter {
        topic: "Problem Solving",
        prompt: "I'm facing a difficult decision at work. Can you help me think through it?",
    },
];

pub fn starters() -> &'static [Starter] {
    STARTERS
}

/// Look a starter up by topic, ignoring case
pub fn find_starter(topic: &str) -> Option<&'static Starter> {
    STARTERS
        .iter()
        .find(|s| s.topic.eq_ignore_ascii_case(topic.trim()))
}
