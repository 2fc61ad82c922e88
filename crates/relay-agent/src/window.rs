//! Bounded conversation history.
//!
//! A [`ContextWindow`] holds at most `capacity` entries in insertion order.
//! Appending past capacity evicts from the front; nothing is ever reordered.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One immutable fragment of prior conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextEntry {
    /// Something a chat member said.
    User { sender: String, text: String },
    /// A model answer that was delivered.
    Response { text: String },
}

impl ContextEntry {
    pub fn user(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::User {
            sender: sender.into(),
            text: text.into(),
        }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Self::Response { text: text.into() }
    }

    /// Raw message text, without sender decoration.
    pub fn text(&self) -> &str {
        match self {
            Self::User { text, .. } | Self::Response { text } => text,
        }
    }

    /// Text as it appears inside a prompt.
    pub fn render(&self) -> String {
        match self {
            Self::User { sender, text } => {
                format!("\n---\nFrom: {sender:?}\nMessage: {text}\n")
            }
            Self::Response { text } => text.clone(),
        }
    }
}

/// Ordered sequence of [`ContextEntry`] capped at a fixed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    entries: VecDeque<ContextEntry>,
    capacity: usize,
}

impl ContextWindow {
    /// Empty window. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Window pre-filled with `entries`; only the newest `capacity` are kept.
    pub fn with_entries(capacity: usize, entries: impl IntoIterator<Item = ContextEntry>) -> Self {
        let mut window = Self::new(capacity);
        for entry in entries {
            window.append(entry);
        }
        window
    }

    /// Add `entry` at the tail, evicting from the head while over capacity.
    /// Returns the evicted entries, oldest first.
    pub fn append(&mut self, entry: ContextEntry) -> Vec<ContextEntry> {
        self.entries.push_back(entry);
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(old) = self.entries.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// Remove up to `n` entries from the head. Returns how many were removed.
    pub fn truncate_oldest(&mut self, n: usize) -> usize {
        let n = n.min(self.entries.len());
        for _ in 0..n {
            self.entries.pop_front();
        }
        n
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Current entries, oldest first.
    pub fn snapshot(&self) -> Vec<ContextEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
