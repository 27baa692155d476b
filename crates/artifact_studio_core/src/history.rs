//! crates/artifact_studio_core/src/history.rs
//!
//! Undo/redo log of artifact snapshots.

/// Snapshots of the artifact with a cursor pointing at the current version.
///
/// The cursor is `None` exactly when no snapshot has been recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionHistory {
    versions: Vec<String>,
    cursor: Option<usize>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the history with the code of a resumed session.
    pub fn with_initial(code: &str) -> Self {
        let mut history = Self::new();
        history.push_version(code);
        history
    }

    /// Records `text` as the newest version, discarding any versions past the cursor.
    ///
    /// Empty text is ignored.
    pub fn push_version(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let keep = self.cursor.map_or(0, |c| c + 1);
        self.versions.truncate(keep);
        self.versions.push(text.to_string());
        self.cursor = Some(self.versions.len() - 1);
    }

    pub fn undo(&mut self) -> Option<&str> {
        match self.cursor {
            Some(c) if c > 0 => {
                self.cursor = Some(c - 1);
                Some(&self.versions[c - 1])
            }
            _ => None,
        }
    }

    pub fn redo(&mut self) -> Option<&str> {
        match self.cursor {
            Some(c) if c + 1 < self.versions.len() => {
                self.cursor = Some(c + 1);
                Some(&self.versions[c + 1])
            }
            _ => None,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.versions.len())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&str> {
        self.cursor.map(|c| self.versions[c].as_str())
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
