use serde::{Deserialize, Serialize};

/// A quiz prompt assigned to a match. Immutable once the match is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub canonical_answer: String,
    pub explanation: String,
}

impl Question {
    pub fn new(prompt: &str, canonical_answer: &str, explanation: &str) -> Self {
        Question {
            prompt: prompt.to_string(),
            canonical_answer: canonical_answer.to_string(),
            explanation: explanation.to_string(),
        }
    }

    /// Case-insensitive, whitespace-trimmed exact comparison against the
    /// canonical answer. No partial credit and no numeric tolerance.
    pub fn is_correct(&self, submitted: &str) -> bool {
        normalize_answer(submitted) == normalize_answer(&self.canonical_answer)
    }
}

pub fn normalize_answer(text: &str) -> String {
    text.trim().to_lowercase()
}
