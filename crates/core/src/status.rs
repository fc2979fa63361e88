use crate::document::StageStatus;
use crate::error::IngestError;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub type StatusMap = BTreeMap<String, StageStatus>;

#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file means no prior status.
    pub fn load(&self) -> StatusMap {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return StatusMap::new(),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "error with status file loading");
                return StatusMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "error with status file loading");
                StatusMap::new()
            }
        }
    }

    pub fn save(&self, file_name: &str, status: StageStatus) -> Result<(), IngestError> {
        let mut all = self.load();
        all.insert(file_name.to_string(), status);

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&all)
            .map_err(|error| IngestError::Configuration(format!("status encode: {error}")))?;
        fs::write(&self.path, json)?;

        info!(file = file_name, "[{}] status saved", file_name);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), IngestError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
