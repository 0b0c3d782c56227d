//! Applying provisioner output.
//!
//! [`ProvisionOutput::apply`] folds one provisioner result into a new
//! [`State`] snapshot, the file tree under the mount root and the compose
//! project.
//!
//! # State Contract
//!
//! Resource state and outputs are always replaced by what the provisioner
//! returned; a missing value clears them. A provisioner must re-emit any
//! value it wants to keep.
//!
//! # Mount Root Confinement
//!
//! Relative paths are normalized lexically and must stay under the mount
//! root: absolute paths and `..` segments that climb above the root are
//! rejected before anything touches the disk.

use crate::error::{Error, Result};
use crate::patch::patch_map;
use crate::project::{ComposeProject, ResourceUid, State};
use crate::provisioner::ProvisionOutput;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

impl ProvisionOutput {
    /// Applies this output for `uid`, returning the new state snapshot.
    ///
    /// `project` receives the generated networks, volumes and services by
    /// name; a later definition with the same name replaces an earlier one.
    pub fn apply(
        self,
        state: &State,
        uid: &ResourceUid,
        project: &mut ComposeProject,
    ) -> Result<State> {
        debug!(
            "Provisioned resource '{}': {} outputs, {} directories, {} files, {} volumes, {} networks, {} services",
            uid,
            self.resource_outputs.as_ref().map_or(0, |o| o.len()),
            self.relative_directories.len(),
            self.relative_file_contents.len(),
            self.compose_volumes.len(),
            self.compose_networks.len(),
            self.compose_services.len(),
        );

        let mut out = state.clone();
        let existing = out
            .resources
            .get_mut(uid)
            .ok_or_else(|| Error::ResourceNotFound(uid.clone()))?;

        existing.provisioner_uri = self.provisioner_uri;
        existing.state = self.resource_state.unwrap_or_default();
        existing.outputs = self.resource_outputs.unwrap_or_default();
        if let Some(lookup) = self.output_lookup_fn {
            existing.output_lookup_fn = Some(lookup);
        }

        if let Some(shared) = &self.shared_state {
            out.shared_state = patch_map(&state.shared_state, shared);
        }

        let mounts = &state.mounts_directory;
        for (relative, ensure) in &self.relative_directories {
            let dst = mounts.join(confine(relative)?);
            if *ensure {
                debug!("Ensuring mount directory '{}' exists", dst.display());
                fs::create_dir_all(&dst).map_err(|e| materialize_err(&dst, e))?;
            } else {
                debug!("Ensuring mount directory '{}' no longer exists", dst.display());
                match fs::remove_dir_all(&dst) {
                    Err(e) if e.kind() != ErrorKind::NotFound => {
                        return Err(materialize_err(&dst, e));
                    }
                    _ => {}
                }
            }
        }

        for (relative, content) in &self.relative_file_contents {
            let dst = mounts.join(confine(relative)?);
            match content {
                Some(content) => {
                    debug!("Ensuring mount file '{}' exists", dst.display());
                    if let Some(parent) = dst.parent() {
                        fs::create_dir_all(parent).map_err(|e| materialize_err(&dst, e))?;
                    }
                    fs::write(&dst, content).map_err(|e| materialize_err(&dst, e))?;
                }
                None => {
                    debug!("Ensuring mount file '{}' no longer exists", dst.display());
                    match fs::remove_file(&dst) {
                        Err(e) if e.kind() != ErrorKind::NotFound => {
                            return Err(materialize_err(&dst, e));
                        }
                        _ => {}
                    }
                }
            }
        }

        project.networks.extend(self.compose_networks);
        project.volumes.extend(self.compose_volumes);
        project.services.extend(self.compose_services);

        Ok(out)
    }
}

fn materialize_err(path: &Path, e: std::io::Error) -> Error {
    Error::Materialize {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Normalizes `relative` lexically, failing if it is absolute or climbs out
/// of the directory it is joined to. An empty path is the root itself.
fn confine(relative: &str) -> Result<PathBuf> {
    let escapes = || Error::PathEscapesMount {
        path: relative.to_string(),
    };
    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(escapes());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confine_normalizes() {
        assert_eq!(confine("a/./b/../c").unwrap(), PathBuf::from("a/c"));
        assert_eq!(confine("").unwrap(), PathBuf::new());
        assert_eq!(confine("a/..").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_confine_rejects_escapes() {
        assert!(matches!(confine("../x"), Err(Error::PathEscapesMount { .. })));
        assert!(matches!(confine("a/../../x"), Err(Error::PathEscapesMount { .. })));
        assert!(matches!(confine("/etc/passwd"), Err(Error::PathEscapesMount { .. })));
    }
}
