use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::session::Session;

pub const METADATA_FILE: &str = "metadata.json";

/// Reads and writes per-session metadata records under a data root.
///
/// Sessions live at `root/<id>/` or, when recorded for a known account,
/// `root/<account>/<id>/`.
pub struct SessionCatalog {
    root: PathBuf,
}

impl SessionCatalog {
    /// Creates the root directory if it doesn't exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| IngestError::storage(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `metadata.json` into the session's own directory
    pub fn save(&self, session: &Session) -> Result<PathBuf> {
        let path = session.directory.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(session)?;

        // Write to temporary file first, then rename over the target
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| IngestError::storage(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| IngestError::storage(&path, e))?;

        Ok(path)
    }

    /// Load the record stored in `session_dir`
    pub fn load(&self, session_dir: &Path) -> Result<Session> {
        let path = session_dir.join(METADATA_FILE);
        let json = fs::read_to_string(&path).map_err(|e| IngestError::storage(&path, e))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Every readable record under the root, oldest first
    pub fn list_all(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        if !self.root.exists() {
            return Ok(sessions);
        }

        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }

            if dir.join(METADATA_FILE).exists() {
                self.push_if_readable(&dir, &mut sessions);
                continue;
            }

            // Per-account directory
            for nested in fs::read_dir(&dir)? {
                let nested = nested?.path();
                if nested.is_dir() && nested.join(METADATA_FILE).exists() {
                    self.push_if_readable(&nested, &mut sessions);
                }
            }
        }

        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(sessions)
    }

    fn push_if_readable(&self, dir: &Path, sessions: &mut Vec<Session>) {
        match self.load(dir) {
            Ok(session) => sessions.push(session),
            Err(e) => log::warn!("Skipping unreadable session metadata in {:?}: {}", dir, e),
        }
    }
}
