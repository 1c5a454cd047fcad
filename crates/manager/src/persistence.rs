//! File-backed ignore list.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use webhooks::{IgnoreListStore, PersistenceError, RepositoryIdentity};

/// File name used inside the state directory.
pub const IGNORE_LIST_FILE: &str = "ignored-repositories.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IgnoreListRecord {
    #[serde(default)]
    ignored: Vec<RepositoryIdentity>,
}

/// Stores the ignore list as JSON, replacing the file atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileIgnoreStore {
    path: PathBuf,
}

impl JsonFileIgnoreStore {
    /// A store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A store writing [`IGNORE_LIST_FILE`] inside `state_dir`.
    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join(IGNORE_LIST_FILE))
    }

    /// Location of the ignore-list file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl IgnoreListStore for JsonFileIgnoreStore {
    fn load(&self) -> Result<Vec<RepositoryIdentity>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No ignore list on disk");
                return Ok(Vec::new());
            }
            Err(err) => return Err(self.io_error(err)),
        };
        let record: IgnoreListRecord =
            serde_json::from_str(&content).map_err(|err| PersistenceError::Corrupt {
                path: self.path.display().to_string(),
                message: err.to_string(),
            })?;
        Ok(record.ignored)
    }

    fn save(&self, ignored: &[RepositoryIdentity]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let record = IgnoreListRecord {
            ignored: ignored.to_vec(),
        };
        let content =
            serde_json::to_string_pretty(&record).map_err(|err| PersistenceError::Corrupt {
                path: self.path.display().to_string(),
                message: err.to_string(),
            })?;

        // Write to a sibling file then rename, so readers never see a torn list.
        let temp_path = self.path.with_extension("json.tmp");
        let written = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &self.path)
        });
        if let Err(err) = written {
            // The temp file may not exist if create itself failed.
            let _ = fs::remove_file(&temp_path);
            return Err(self.io_error(err));
        }
        debug!(path = %self.path.display(), count = ignored.len(), "Saved ignore list");
        Ok(())
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
