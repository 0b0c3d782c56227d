//! Generated compose project.
//!
//! Only the parts the provisioning engine writes are modelled: named service,
//! volume and network definitions. The definitions themselves stay opaque maps
//! in the compose file schema.

use crate::error::Result;
use crate::patch::Map;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compose project under construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeProject {
    /// Project name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Services by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Map>,
    /// Volumes by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Map>,
    /// Networks by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Map>,
}

impl ComposeProject {
    /// Creates an empty project.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Renders the project as a compose YAML document.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
