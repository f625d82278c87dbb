//! Persisted daemon state.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt state file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    /// Person group id on the Face API. Generated once, reused on every start.
    pub whitelist_group_id: String,
}

impl DaemonState {
    /// Read the state file, creating it with a fresh group id if absent.
    pub fn load_or_create(path: &Path) -> Result<Self, StateError> {
        let io_err = |source| StateError::Io {
            path: path.display().to_string(),
            source,
        };

        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let state = Self {
                    whitelist_group_id: uuid::Uuid::new_v4().to_string(),
                };
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err)?;
                }
                std::fs::write(path, toml::to_string(&state)?).map_err(io_err)?;
                tracing::info!(
                    path = %path.display(),
                    group_id = %state.whitelist_group_id,
                    "created daemon state"
                );
                Ok(state)
            }
            Err(e) => Err(io_err(e)),
        }
    }
}
