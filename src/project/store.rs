//! On-disk project state.
//!
//! ```text
//! <root>/.magikcompose/
//! ├── state.yaml      # persisted State (outputs are never written)
//! └── mounts/         # mount root handed to provisioners
//! ```
//!
//! `state.yaml` is written atomically: the YAML goes to a uniquely named
//! sibling temp file which is then renamed over the target.

use super::state::State;
use crate::constants::{MOUNTS_DIRECTORY_NAME, STATE_DIRECTORY_NAME, STATE_FILE_NAME};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A project state directory and the state loaded from it.
#[derive(Debug, Clone)]
pub struct StateDirectory {
    path: PathBuf,
    /// The current state.
    pub state: State,
}

impl StateDirectory {
    /// Creates the state directory under `root` with an empty state.
    ///
    /// An existing state is kept; only the project name is updated.
    pub fn init(root: &Path, project_name: &str) -> Result<Self> {
        let path = root.join(STATE_DIRECTORY_NAME);
        let mounts = path.join(MOUNTS_DIRECTORY_NAME);
        fs::create_dir_all(&mounts).map_err(|e| Error::StateWriteFailed {
            path: mounts.clone(),
            reason: e.to_string(),
        })?;

        let state = match Self::load(root)? {
            Some(existing) => State {
                project_name: project_name.to_string(),
                ..existing.state
            },
            None => State::new(project_name, &mounts),
        };
        let dir = Self { path, state };
        dir.persist()?;
        Ok(dir)
    }

    /// Loads the state directory under `root`, or `None` if it was never
    /// initialised.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(STATE_DIRECTORY_NAME);
        let file = path.join(STATE_FILE_NAME);
        let raw = match fs::read(&file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StateLoadFailed {
                    path: file,
                    reason: e.to_string(),
                });
            }
        };
        let mut state: State = serde_yaml::from_slice(&raw).map_err(|e| Error::StateLoadFailed {
            path: file.clone(),
            reason: e.to_string(),
        })?;
        if state.mounts_directory.as_os_str().is_empty() {
            state.mounts_directory = path.join(MOUNTS_DIRECTORY_NAME);
        }
        debug!("Loaded state from {}", file.display());
        Ok(Some(Self { path, state }))
    }

    /// The `.magikcompose` directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current state to `state.yaml`.
    pub fn persist(&self) -> Result<()> {
        let file = self.path.join(STATE_FILE_NAME);
        let write_err = |e: &dyn std::fmt::Display| Error::StateWriteFailed {
            path: file.clone(),
            reason: e.to_string(),
        };

        let yaml = serde_yaml::to_string(&self.state).map_err(|e| write_err(&e))?;
        write_atomic(&file, yaml.as_bytes()).map_err(|e| write_err(&e))?;

        debug!("Persisted state to {}", file.display());
        Ok(())
    }
}

/// Writes `contents` to a temporary sibling of `path`, then renames it over
/// `path`. The temporary file is removed if the rename fails.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}
