//! Post-completion gate: decides whether a response reaches the chat.

use relay_core::config::DEFAULT_SENTINEL;

/// What to do with a completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Deliver(String),
    /// The model chose not to answer, or produced nothing.
    Suppress,
}

#[derive(Debug, Clone)]
pub struct ResponseFilter {
    sentinel: String,
}

impl Default for ResponseFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL)
    }
}

impl ResponseFilter {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Suppress when the text contains the sentinel anywhere or is blank.
    /// Delivered text is passed through unchanged.
    pub fn classify(&self, response: &str) -> Verdict {
        if response.trim().is_empty() {
            return Verdict::Suppress;
        }
        if !self.sentinel.is_empty() && response.contains(&self.sentinel) {
            return Verdict::Suppress;
        }
        Verdict::Deliver(response.to_string())
    }
}
