//! Durable transcript storage.

use crate::{Error, Result, task::Conversation};
use std::path::{Path, PathBuf};

/// Writes each transcript to its own timestamped JSON file.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    /// A store writing into `dir`, created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Save a transcript, returning the written path
    pub fn save(&self, conversation: &Conversation) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!("failed to create {}: {e}", self.dir.display()))
        })?;

        let name = chrono::Local::now()
            .format("conversation_%Y%m%d%H%M%S_%6f.json")
            .to_string();
        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(conversation)
            .map_err(|e| Error::Persistence(format!("failed to serialize transcript: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| Error::Persistence(format!("failed to write {}: {e}", path.display())))?;
        Ok(path)
    }

    /// Load a transcript written by [`TranscriptStore::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Conversation> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Persistence(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Persistence(format!("failed to parse {}: {e}", path.display())))
    }
}
