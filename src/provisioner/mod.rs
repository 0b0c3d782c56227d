//! Provisioners.
//!
//! A provisioner turns one resource into persisted state, outputs, files under
//! the mount root and compose definitions. Every family implements the same
//! [`Provisioner`] trait:
//!
//! | Family                    | Uri                          | Source              |
//! |---------------------------|------------------------------|---------------------|
//! | [`TemplateProvisioner`]   | `template://...`             | provisioner files   |
//! | [`CommandProvisioner`]    | `cmd://...`                  | provisioner files   |
//! | [`EnvironmentProvisioner`]| `builtin://environment`      | built in            |
//! | [`EphemeralProvisioner`]  | any                          | embedding code      |
//!
//! Selection is first match in registration order, see [`ProvisionerRegistry`].

pub mod command;
pub mod environment;
pub mod ephemeral;
pub mod registry;
pub mod template;

pub use self::command::CommandProvisioner;
pub use self::environment::{EnvironmentFallback, EnvironmentProvisioner};
pub use self::ephemeral::EphemeralProvisioner;
pub use self::registry::{
    ProvisionerRegistry, ProvisionerSummary, load_provisioners, load_provisioners_from_directory,
};
pub use self::template::TemplateProvisioner;

use crate::error::Result;
use crate::patch::Map;
use crate::project::ResourceUid;
use crate::substitution::OutputLookupFn;
use crate::workload::Protocol;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Provisioner Trait
// =============================================================================

/// A pluggable implementation that satisfies resources of a type/class/id
/// pattern.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the descriptive metadata and match rule.
    fn descriptor(&self) -> &ProvisionerDescriptor;

    /// Returns the provisioner uri recorded against provisioned resources.
    fn uri(&self) -> &str {
        &self.descriptor().uri
    }

    /// Checks whether this provisioner handles the resource.
    fn matches(&self, uid: &ResourceUid) -> bool {
        self.descriptor().matches(uid)
    }

    /// Provisions one resource.
    ///
    /// Implementations that block on external work must return
    /// [`Error::Cancelled`](crate::Error::Cancelled) once `cancel` fires.
    async fn provision(&self, cancel: &CancellationToken, input: &Input) -> Result<ProvisionOutput>;
}

impl std::fmt::Debug for dyn Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner").field("uri", &self.uri()).finish()
    }
}

/// Match rule and listing metadata of a provisioner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionerDescriptor {
    /// Unique uri.
    pub uri: String,
    /// Resource type matched exactly.
    pub resource_type: String,
    /// Class constraint, any class if `None`.
    pub class: Option<String>,
    /// Id constraint, any id if `None`.
    pub id: Option<String>,
    /// Human readable description.
    pub description: String,
    /// Params the provisioner understands.
    pub supported_params: Vec<String>,
    /// Outputs the provisioner produces.
    pub expected_outputs: Vec<String>,
}

impl ProvisionerDescriptor {
    /// Creates a descriptor matching every resource of a type.
    pub fn new(uri: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Type must be equal; class and id only when constrained.
    #[must_use]
    pub fn matches(&self, uid: &ResourceUid) -> bool {
        uid.resource_type() == self.resource_type
            && self.class.as_deref().is_none_or(|c| c == uid.class())
            && self.id.as_deref().is_none_or(|id| id == uid.id())
    }
}

// =============================================================================
// Provisioning Input
// =============================================================================

/// Everything handed to a provisioner. Serialized as JSON for command
/// provisioners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub resource_uid: ResourceUid,
    pub resource_type: String,
    pub resource_class: String,
    pub resource_id: String,
    /// Params with placeholders resolved.
    pub resource_params: Map,
    pub resource_metadata: Map,

    /// Workload carrying the definition used for this resource.
    pub source_workload: String,
    /// How to reach every workload of the project, by workload name.
    pub workload_services: BTreeMap<String, NetworkService>,

    /// State persisted by the previous provisioning of this resource.
    pub resource_state: Map,
    /// Project-wide shared state.
    pub shared_state: Map,

    pub compose_project_name: String,
    pub mount_directory_path: PathBuf,
}

/// How to contact the ports exposed by a workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkService {
    /// Hostname of the workload inside the compose network.
    pub service_name: String,
    /// Ports by name, plus aliases by port number.
    pub ports: BTreeMap<String, ServicePort>,
}

/// A resolved service port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
}

// =============================================================================
// Provisioning Output
// =============================================================================

/// The result of one provisioning call.
///
/// Decoded strictly from command provisioners: unknown fields are rejected.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionOutput {
    /// New persisted state; `None` clears it.
    #[serde(default)]
    pub resource_state: Option<Map>,
    /// New outputs; `None` clears them.
    #[serde(default)]
    pub resource_outputs: Option<Map>,
    /// Merge patch for the shared state.
    #[serde(default)]
    pub shared_state: Option<Map>,
    /// Directories under the mount root: `true` ensures, `false` removes.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub relative_directories: BTreeMap<String, bool>,
    /// Files under the mount root: content writes, `null` removes.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub relative_file_contents: BTreeMap<String, Option<String>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub compose_networks: BTreeMap<String, Map>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub compose_volumes: BTreeMap<String, Map>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub compose_services: BTreeMap<String, Map>,

    /// Uri of the provisioner that produced this output, set by the
    /// orchestrator.
    #[serde(skip)]
    pub provisioner_uri: String,
    /// Lookup replacing static outputs, for built in provisioners.
    #[serde(skip)]
    pub output_lookup_fn: Option<OutputLookupFn>,
}

/// Decodes an explicit `null` map as empty.
fn null_as_empty<'de, D, V>(deserializer: D) -> std::result::Result<BTreeMap<String, V>, D::Error>
where
    D: serde::Deserializer<'de>,
    V: Deserialize<'de>,
{
    Ok(Option::<BTreeMap<String, V>>::deserialize(deserializer)?.unwrap_or_default())
}

impl std::fmt::Debug for ProvisionOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionOutput")
            .field("resource_state", &self.resource_state)
            .field("resource_outputs", &self.resource_outputs)
            .field("shared_state", &self.shared_state)
            .field("relative_directories", &self.relative_directories)
            .field("relative_file_contents", &self.relative_file_contents)
            .field("compose_networks", &self.compose_networks)
            .field("compose_volumes", &self.compose_volumes)
            .field("compose_services", &self.compose_services)
            .field("provisioner_uri", &self.provisioner_uri)
            .field("output_lookup_fn", &self.output_lookup_fn.is_some())
            .finish()
    }
}
