//! Static banned-user list.
//!
//! One identity per line. Blank lines and lines starting with `#` are ignored,
//! and anything after a `#` on a line is a comment. Entries may include or
//! omit the leading `@`.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{RelayError, Result};

/// Identities excluded from processing. Read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct BannedSet {
    entries: HashSet<String>,
}

impl BannedSet {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let line = line.split('#').next().unwrap_or("").trim();
                let line = line.trim_start_matches('@');
                (!line.is_empty()).then(|| line.to_string())
            })
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RelayError::File {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Returns `true` when either the username or the numeric id is listed.
    ///
    /// Matching is case-sensitive, like Telegram usernames in the API.
    pub fn contains(&self, username: &str, user_id: &str) -> bool {
        let username = username.trim_start_matches('@');
        (!username.is_empty() && self.entries.contains(username))
            || (!user_id.is_empty() && self.entries.contains(user_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_set_bans_nobody() {
        let set = BannedSet::default();
        assert!(!set.contains("alice", "111"));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let set = BannedSet::parse("# header\n\nalice\n   \n#bob\n");
        assert_eq!(set.len(), 1);
        assert!(set.contains("alice", ""));
        assert!(!set.contains("bob", ""));
    }

    #[test]
    fn trailing_comment_stripped() {
        let set = BannedSet::parse("mallory # spammer since march\n");
        assert!(set.contains("mallory", "1"));
        assert!(!set.contains("mallory # spammer since march", "1"));
    }

    #[test]
    fn at_prefix_optional() {
        let set = BannedSet::parse("@alice\n");
        assert!(set.contains("alice", "1"));
        assert!(set.contains("@alice", "1"));
    }

    #[test]
    fn match_by_numeric_id() {
        let set = BannedSet::parse("123456789\n");
        assert!(set.contains("", "123456789"));
        assert!(!set.contains("alice", "111"));
    }

    #[test]
    fn empty_identity_never_matches() {
        let set = BannedSet::parse("alice\n");
        assert!(!set.contains("", ""));
    }

    #[test]
    fn case_sensitive_username() {
        let set = BannedSet::parse("Alice\n");
        assert!(set.contains("Alice", "1"));
        assert!(!set.contains("alice", "1"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "eve\n# ops\n42").unwrap();
        let set = BannedSet::load(file.path()).unwrap();
        assert!(set.contains("eve", ""));
        assert!(set.contains("", "42"));
    }
}
