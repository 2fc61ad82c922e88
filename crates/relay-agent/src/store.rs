//! Per-conversation context windows.
//!
//! Each conversation key owns one [`ContextWindow`] behind its own async mutex.
//! A pipeline run holds that mutex for its whole read-modify-write, including
//! the completion call, so runs in one conversation serialize while other
//! conversations proceed. The map itself is a `DashMap`; its shard guards are
//! never held across an await.
//!
//! Without a snapshot directory every conversation stays resident for the life
//! of the process, one entry per chat under [`ContextScope::Chat`]. With one,
//! an idle conversation is evicted once its snapshot is on disk and reloaded
//! from that file on its next message.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use relay_core::config::ContextScope;

use crate::window::{ContextEntry, ContextWindow};

/// Key used for every conversation under [`ContextScope::Global`].
pub const GLOBAL_KEY: &str = "global";

/// Mutable state of one conversation.
#[derive(Debug)]
pub struct Conversation {
    pub window: ContextWindow,
    /// Set when the window started empty because no snapshot existed.
    fresh: bool,
}

impl Conversation {
    /// Returns `true` exactly once for a conversation that started without a
    /// snapshot, so the caller can seed it from elsewhere.
    pub fn take_fresh(&mut self) -> bool {
        std::mem::take(&mut self.fresh)
    }
}

pub struct ContextStore {
    conversations: DashMap<String, Arc<Mutex<Conversation>>>,
    capacity: usize,
    scope: ContextScope,
    snapshot_dir: Option<PathBuf>,
}

impl ContextStore {
    pub fn new(capacity: usize, scope: ContextScope) -> Self {
        Self {
            conversations: DashMap::new(),
            capacity,
            scope,
            snapshot_dir: None,
        }
    }

    /// Mirror every window to `<dir>/<key>.json`.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Map a chat id to the key its window is stored under.
    pub fn key_for(&self, conversation_id: &str) -> String {
        match self.scope {
            ContextScope::Chat => conversation_id.to_string(),
            ContextScope::Global => GLOBAL_KEY.to_string(),
        }
    }

    /// Handle to the conversation's state, created (or restored) on first use.
    pub fn acquire(&self, key: &str) -> Arc<Mutex<Conversation>> {
        if let Some(existing) = self.conversations.get(key) {
            return Arc::clone(existing.value());
        }

        // Loading under the entry guard keeps a concurrent eviction from
        // slipping between the read of the snapshot and the insert.
        let slot = self
            .conversations
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.restore(key))));
        Arc::clone(slot.value())
    }

    fn restore(&self, key: &str) -> Conversation {
        match self.load_snapshot(key) {
            Some(window) => Conversation {
                window,
                fresh: false,
            },
            None => Conversation {
                window: ContextWindow::new(self.capacity),
                fresh: true,
            },
        }
    }

    /// Write the window to its snapshot file. Failures are logged, never
    /// returned; the result says whether the window is now on disk.
    pub fn save(&self, key: &str, window: &ContextWindow) -> bool {
        let Some(path) = self.snapshot_path(key) else {
            return false;
        };
        match write_snapshot(&path, window) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "context snapshot write failed");
                false
            }
        }
    }

    /// Give back a handle from [`acquire`](Self::acquire) after its window was
    /// saved. The conversation leaves memory when no other task holds it.
    pub fn release(&self, key: &str, slot: Arc<Mutex<Conversation>>) {
        drop(slot);
        if self.snapshot_dir.is_none() {
            return;
        }
        if self
            .conversations
            .remove_if(key, |_, conv| Arc::strong_count(conv) == 1)
            .is_some()
        {
            debug!(key, "idle conversation evicted");
        }
    }

    /// Number of conversations currently held in memory.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn snapshot_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.snapshot_dir.as_ref()?;
        Some(dir.join(format!("{}.json", file_stem(key))))
    }

    fn load_snapshot(&self, key: &str) -> Option<ContextWindow> {
        let path = self.snapshot_path(key)?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "context snapshot unreadable");
                return None;
            }
        };
        match serde_json::from_slice::<Vec<ContextEntry>>(&bytes) {
            Ok(entries) => {
                debug!(key, entries = entries.len(), "context restored from snapshot");
                Some(ContextWindow::with_entries(self.capacity, entries))
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "context snapshot corrupt, starting empty");
                None
            }
        }
    }
}

fn write_snapshot(path: &Path, window: &ContextWindow) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(&window.snapshot())?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

/// Conversation keys are chat ids (`-100123`) or `global`; keep file names tame.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
