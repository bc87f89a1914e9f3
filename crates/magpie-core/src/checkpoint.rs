use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Durable record of which (stage, target) pairs are already complete.
///
/// One JSON document, loaded once at startup and overwritten wholesale
/// after every state-changing unit of work. Membership in a completed set
/// means that stage's side effects for the target are already durably
/// persisted; the sets only ever grow, except through an explicit reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointState {
    /// Topics whose author pages have been fully walked.
    pub completed_topics: BTreeSet<String>,
    /// Handles chosen for per-author processing, in first-seen order.
    pub selected_authors: Vec<String>,
    pub detailed_authors: BTreeSet<String>,
    pub listed_authors: BTreeSet<String>,
    pub content_fetched_authors: BTreeSet<String>,
    pub follower_fetched_authors: BTreeSet<String>,
}

impl CheckpointState {
    pub fn is_topic_complete(&self, topic: &str) -> bool {
        self.completed_topics.contains(topic)
    }

    pub fn mark_topic_complete(&mut self, topic: &str) {
        self.completed_topics.insert(topic.to_string());
    }

    pub fn is_selected(&self, username: &str) -> bool {
        self.selected_authors.iter().any(|u| u == username)
    }

    /// Append a handle to the selection, preserving first-seen order.
    pub fn select_author(&mut self, username: &str) {
        if !self.is_selected(username) {
            self.selected_authors.push(username.to_string());
        }
    }

    pub fn is_detailed(&self, username: &str) -> bool {
        self.detailed_authors.contains(username)
    }

    pub fn mark_detailed(&mut self, username: &str) {
        self.detailed_authors.insert(username.to_string());
    }

    pub fn is_listed(&self, username: &str) -> bool {
        self.listed_authors.contains(username)
    }

    pub fn mark_listed(&mut self, username: &str) {
        self.listed_authors.insert(username.to_string());
    }

    pub fn is_content_fetched(&self, username: &str) -> bool {
        self.content_fetched_authors.contains(username)
    }

    pub fn mark_content_fetched(&mut self, username: &str) {
        self.content_fetched_authors.insert(username.to_string());
    }

    pub fn is_follower_fetched(&self, username: &str) -> bool {
        self.follower_fetched_authors.contains(username)
    }

    pub fn mark_follower_fetched(&mut self, username: &str) {
        self.follower_fetched_authors.insert(username.to_string());
    }

    /// True once every selected author has passed through all four
    /// per-author stages.
    pub fn all_stages_complete(&self) -> bool {
        self.selected_authors.iter().all(|u| {
            self.is_detailed(u)
                && self.is_listed(u)
                && self.is_content_fetched(u)
                && self.is_follower_fetched(u)
        })
    }
}

/// Durable storage for the checkpoint document.
pub trait CheckpointStore: Send + Sync {
    /// Load the document; an absent document means an empty state.
    fn load(&self) -> Result<CheckpointState, HarvestError>;

    /// Overwrite the document with the given state.
    fn save(&self, state: &CheckpointState) -> Result<(), HarvestError>;

    /// Delete the document, so the next load starts from empty.
    fn reset(&self) -> Result<(), HarvestError>;
}

/// Checkpoint document as a pretty-printed JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonCheckpointFile {
    path: PathBuf,
}

impl JsonCheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for JsonCheckpointFile {
    fn load(&self) -> Result<CheckpointState, HarvestError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                HarvestError::Checkpoint(format!(
                    "malformed checkpoint {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointState::default()),
            Err(e) => Err(HarvestError::Checkpoint(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn save(&self, state: &CheckpointState) -> Result<(), HarvestError> {
        let doc = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, doc).map_err(|e| {
            HarvestError::Checkpoint(format!("cannot write {}: {e}", self.path.display()))
        })
    }

    fn reset(&self) -> Result<(), HarvestError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarvestError::Checkpoint(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_in(dir: &tempfile::TempDir) -> JsonCheckpointFile {
        JsonCheckpointFile::new(dir.path().join("progress.json"))
    }

    #[test]
    fn absent_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_in(&dir);
        assert_eq!(store.load().unwrap(), CheckpointState::default());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_in(&dir);

        let mut state = CheckpointState::default();
        state.mark_topic_complete("programming");
        state.select_author("ada");
        state.select_author("grace");
        state.mark_detailed("ada");
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.selected_authors, vec!["ada", "grace"]);
    }

    #[test]
    fn save_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_in(&dir);

        let mut state = CheckpointState::default();
        state.mark_detailed("ada");
        store.save(&state).unwrap();

        state.mark_detailed("grace");
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.detailed_authors.len(), 2);
    }

    #[test]
    fn reset_deletes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_in(&dir);

        store.save(&CheckpointState::default()).unwrap();
        store.reset().unwrap();
        store.reset().unwrap();
        assert_eq!(store.load().unwrap(), CheckpointState::default());
    }

    #[test]
    fn malformed_document_is_a_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, HarvestError::Checkpoint(_)));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        // Documents written by older runs may lack newer sets.
        let partial = r#"{"completed_topics": ["ai"], "selected_authors": ["ada"]}"#;
        let state: CheckpointState = serde_json::from_str(partial).unwrap();
        assert!(state.is_topic_complete("ai"));
        assert!(state.is_selected("ada"));
        assert!(state.detailed_authors.is_empty());
    }

    #[test]
    fn selection_ignores_duplicates_and_keeps_order() {
        let mut state = CheckpointState::default();
        state.select_author("ada");
        state.select_author("grace");
        state.select_author("ada");
        assert_eq!(state.selected_authors, vec!["ada", "grace"]);
    }

    #[test]
    fn all_stages_complete_requires_every_set() {
        let mut state = CheckpointState::default();
        state.select_author("ada");
        assert!(!state.all_stages_complete());

        state.mark_detailed("ada");
        state.mark_listed("ada");
        state.mark_content_fetched("ada");
        assert!(!state.all_stages_complete());

        state.mark_follower_fetched("ada");
        assert!(state.all_stages_complete());
    }
}
