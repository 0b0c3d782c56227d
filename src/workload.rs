//! Workload specification types.
//!
//! The engine consumes workloads that were already validated upstream. Only
//! the parts it needs are typed here: metadata, the service port map and the
//! resource declarations. Everything else (containers, build hints, ...) is
//! kept as an opaque map so a workload survives a save/load round trip.
//!
//! # Supported Formats
//!
//! - **YAML**: Primary format, parsed via `serde_yaml`
//! - **JSON**: Also supported (YAML is a superset of JSON)

use crate::constants::MAX_MANIFEST_SIZE;
use crate::error::{Error, Result};
use crate::patch::Map;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Workload
// =============================================================================

/// A validated workload specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Workload metadata; `name` is required.
    #[serde(default)]
    pub metadata: Map,
    /// Ports other workloads and route provisioners can address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<WorkloadService>,
    /// Resource declarations keyed by the workload-local resource name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceDecl>,
    /// Fields the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map,
}

impl Workload {
    /// Parses a workload from YAML bytes.
    ///
    /// # Errors
    ///
    /// - Size exceeds `MAX_MANIFEST_SIZE`
    /// - YAML parsing fails
    /// - `metadata.name` is missing or not a string
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        if yaml.len() > MAX_MANIFEST_SIZE {
            return Err(Error::InvalidInput(format!(
                "manifest size {} exceeds limit of {}",
                yaml.len(),
                MAX_MANIFEST_SIZE
            )));
        }

        let workload: Self =
            serde_yaml::from_slice(yaml).map_err(|e| Error::InvalidInput(e.to_string()))?;
        workload.validated_name()?;
        Ok(workload)
    }

    /// Returns the workload name from `metadata.name`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(|n| n.as_str())
    }

    /// Returns the workload name, failing if it is absent.
    pub fn validated_name(&self) -> Result<&str> {
        match self.name() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(Error::InvalidInput("missing metadata.name".to_string())),
        }
    }
}

// =============================================================================
// Service Ports
// =============================================================================

/// Network service exposed by a workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadService {
    /// Named ports.
    #[serde(default)]
    pub ports: BTreeMap<String, ServicePortSpec>,
}

/// A single named port declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    /// Published port.
    pub port: u16,
    /// Port inside the workload, defaults to `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    /// Transport protocol, defaults to TCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

/// Transport protocol of a service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

// =============================================================================
// Resource Declarations
// =============================================================================

/// A resource as declared inside a workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Resource type, e.g. `postgres`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Optional class, `default` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Explicit id; makes the resource shared across workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-form metadata handed to the provisioner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map>,
    /// Params; may contain `${...}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map>,
}

impl ResourceDecl {
    /// Creates a declaration of the given type with no class, id or params.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Sets the params.
    #[must_use]
    pub fn with_params(mut self, params: Map) -> Self {
        self.params = Some(params);
        self
    }

    /// Sets the explicit shared id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the class.
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
