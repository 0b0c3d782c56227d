//! Provisioner registry and provisioner file loading.
//!
//! Provisioner files are YAML lists. Each entry's uri scheme selects the
//! family that parses it:
//!
//! ```yaml
//! - uri: template://example/volume
//!   type: volume
//!   outputs: |
//!     source: {{State.name}}
//! - uri: cmd://python
//!   type: bucket
//!   args: ["./bucket.py"]
//! ```
//!
//! Order matters: the first provisioner matching a resource wins, so files in
//! a directory are loaded in lexical filename order.

use super::{CommandProvisioner, Provisioner, TemplateProvisioner};
use crate::constants::{ANY_CLASS_LABEL, COMMAND_SCHEME, MAX_MANIFEST_SIZE, TEMPLATE_SCHEME};
use crate::error::{Error, Result};
use crate::project::ResourceUid;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Ordered set of provisioners.
#[derive(Debug, Default)]
pub struct ProvisionerRegistry {
    provisioners: Vec<Arc<dyn Provisioner>>,
}

/// One row of `provisioners list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerSummary {
    pub uri: String,
    pub resource_type: String,
    /// Class constraint, `(any)` when unconstrained.
    pub class: String,
    /// Supported params, sorted.
    pub params: Vec<String>,
    /// Expected outputs, sorted.
    pub outputs: Vec<String>,
    pub description: String,
}

impl ProvisionerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provisioner with the lowest precedence so far.
    pub fn push(&mut self, provisioner: Arc<dyn Provisioner>) {
        self.provisioners.push(provisioner);
    }

    /// Appends provisioners in order.
    pub fn extend(&mut self, provisioners: impl IntoIterator<Item = Arc<dyn Provisioner>>) {
        self.provisioners.extend(provisioners);
    }

    /// Returns all registered provisioners in precedence order.
    pub fn all(&self) -> &[Arc<dyn Provisioner>] {
        &self.provisioners
    }

    /// Returns the first provisioner matching the resource.
    pub fn find(&self, uid: &ResourceUid) -> Result<&Arc<dyn Provisioner>> {
        self.provisioners
            .iter()
            .find(|p| p.matches(uid))
            .ok_or_else(|| Error::NoMatchingProvisioner(uid.clone()))
    }

    /// Describes every provisioner for listing.
    pub fn describe(&self) -> Vec<ProvisionerSummary> {
        self.provisioners
            .iter()
            .map(|p| {
                let d = p.descriptor();
                let mut params = d.supported_params.clone();
                params.sort();
                let mut outputs = d.expected_outputs.clone();
                outputs.sort();
                ProvisionerSummary {
                    uri: d.uri.clone(),
                    resource_type: d.resource_type.clone(),
                    class: d.class.clone().unwrap_or_else(|| ANY_CLASS_LABEL.to_string()),
                    params,
                    outputs,
                    description: d.description.clone(),
                }
            })
            .collect()
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Parses a provisioner file.
///
/// # Errors
///
/// - The document is not a YAML list
/// - An entry has no scheme or an unsupported one
/// - An entry fails its family's validation (prefixed with its index)
pub fn load_provisioners(raw: &[u8]) -> Result<Vec<Arc<dyn Provisioner>>> {
    if raw.len() > MAX_MANIFEST_SIZE {
        return Err(Error::InvalidInput(format!(
            "provisioner file size {} exceeds limit of {}",
            raw.len(),
            MAX_MANIFEST_SIZE
        )));
    }

    let entries: Vec<serde_yaml::Value> = serde_yaml::from_slice(raw)
        .map_err(|e| Error::InvalidInput(format!("failed to decode file: {e}")))?;

    let mut out: Vec<Arc<dyn Provisioner>> = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let uri = entry
            .get("uri")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string();
        let load_err = |e: Error| Error::ProvisionerLoad {
            index,
            uri: uri.clone(),
            reason: e.to_string(),
        };

        let Some((scheme, _)) = uri.split_once("://") else {
            return Err(load_err(Error::InvalidProvisionerUri {
                uri: uri.clone(),
                reason: "missing uri scheme".to_string(),
            }));
        };

        let provisioner: Arc<dyn Provisioner> = match scheme {
            TEMPLATE_SCHEME => Arc::new(TemplateProvisioner::parse(entry).map_err(load_err)?),
            COMMAND_SCHEME => Arc::new(CommandProvisioner::parse(entry).map_err(load_err)?),
            other => {
                return Err(Error::UnsupportedProvisioner {
                    index,
                    scheme: other.to_string(),
                });
            }
        };
        debug!("Loaded provisioner {}", provisioner.uri());
        out.push(provisioner);
    }
    Ok(out)
}

/// Loads every file in `dir` whose name ends in `suffix`, in lexical order.
pub fn load_provisioners_from_directory(
    dir: &Path,
    suffix: &str,
) -> Result<Vec<Arc<dyn Provisioner>>> {
    debug!(
        "Loading provisioners with suffix {} in directory '{}'",
        suffix,
        dir.display()
    );

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && name.ends_with(suffix) {
            names.push(name);
        }
    }
    names.sort();

    let mut out = Vec::new();
    for name in names {
        let wrap = |e: Error| Error::ProvisionerFile {
            file: name.clone(),
            source: Box::new(e),
        };
        let raw = fs::read(dir.join(&name)).map_err(|e| wrap(e.into()))?;
        out.extend(load_provisioners(&raw).map_err(wrap)?);
    }
    Ok(out)
}
