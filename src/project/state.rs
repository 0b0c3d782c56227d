//! Project state snapshots.
//!
//! [`State`] is an immutable value: every `with_*` operation returns a new
//! snapshot and leaves the receiver untouched, so a caller can discard a
//! partially provisioned snapshot and keep the last good one.

use super::uid::ResourceUid;
use crate::error::{Error, Result};
use crate::patch::Map;
use crate::substitution::{OutputLookupFn, build_substitution_function, map_lookup};
use crate::workload::Workload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Workload State
// =============================================================================

/// A workload registered with the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadState {
    /// The validated workload specification.
    pub spec: Workload,
    /// Source file, if the workload came from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Build configuration per container name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_configs: BTreeMap<String, Map>,
}

// =============================================================================
// Resource State
// =============================================================================

/// Everything known about one resource.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource class, `default` if not declared.
    pub class: String,
    /// Shared id or `workload.resource`.
    pub id: String,
    /// Metadata from the declaration.
    #[serde(default)]
    pub metadata: Option<Map>,
    /// Params from the declaration, placeholders unresolved.
    #[serde(default)]
    pub params: Option<Map>,
    /// Workload that carries the definition used for this resource.
    pub source_workload: String,
    /// Uri of the provisioner that last provisioned this resource.
    #[serde(default, rename = "provisioner", skip_serializing_if = "String::is_empty")]
    pub provisioner_uri: String,
    /// Provisioner-private state, persisted between runs.
    #[serde(default)]
    pub state: Map,
    /// Outputs of the last provisioning call; never persisted.
    #[serde(skip)]
    pub outputs: Map,
    /// Lookup that replaces `outputs` for provisioners deferring their values.
    #[serde(skip)]
    pub output_lookup_fn: Option<OutputLookupFn>,
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("resource_type", &self.resource_type)
            .field("class", &self.class)
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("params", &self.params)
            .field("source_workload", &self.source_workload)
            .field("provisioner_uri", &self.provisioner_uri)
            .field("state", &self.state)
            .field("outputs", &self.outputs)
            .field("output_lookup_fn", &self.output_lookup_fn.is_some())
            .finish()
    }
}

impl ResourceState {
    /// Walks the outputs by key path, deferring to the lookup function if the
    /// provisioner installed one.
    pub fn output_lookup(&self, keys: &[String]) -> Result<Value> {
        if let Some(lookup) = &self.output_lookup_fn {
            return lookup(keys);
        }
        if keys.is_empty() {
            return Err(Error::Lookup(
                "at least one lookup key is required".to_string(),
            ));
        }
        map_lookup(&self.outputs, keys)
    }

    /// Returns an owned lookup over this resource's current outputs.
    #[must_use]
    pub fn lookup_fn(&self) -> OutputLookupFn {
        match &self.output_lookup_fn {
            Some(lookup) => Arc::clone(lookup),
            None => {
                let outputs = self.outputs.clone();
                Arc::new(move |keys: &[String]| {
                    if keys.is_empty() {
                        return Err(Error::Lookup(
                            "at least one lookup key is required".to_string(),
                        ));
                    }
                    map_lookup(&outputs, keys)
                })
            }
        }
    }
}

// =============================================================================
// Project State
// =============================================================================

/// The state of a project: workloads, resources and shared state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    /// Workloads by name.
    #[serde(default)]
    pub workloads: BTreeMap<String, WorkloadState>,
    /// Resources by uid.
    #[serde(default)]
    pub resources: BTreeMap<ResourceUid, ResourceState>,
    /// Cross-resource shared state, keyed by provisioner-chosen namespaces.
    #[serde(default)]
    pub shared_state: Map,
    /// Name of the generated compose project.
    #[serde(default, rename = "compose_project")]
    pub project_name: String,
    /// Root directory for provisioner-generated files.
    #[serde(default)]
    pub mounts_directory: PathBuf,
}

impl State {
    /// Creates an empty state for the given project.
    pub fn new(project_name: impl Into<String>, mounts_directory: impl Into<PathBuf>) -> Self {
        Self {
            project_name: project_name.into(),
            mounts_directory: mounts_directory.into(),
            ..Default::default()
        }
    }

    /// Returns a copy with the workload added or replaced.
    pub fn with_workload(
        &self,
        spec: Workload,
        file: Option<PathBuf>,
        build_configs: BTreeMap<String, Map>,
    ) -> Result<Self> {
        let name = spec.validated_name()?.to_string();
        let mut out = self.clone();
        out.workloads.insert(
            name,
            WorkloadState {
                spec,
                file,
                build_configs,
            },
        );
        Ok(out)
    }

    /// Returns a copy where every declared resource has a [`ResourceState`].
    ///
    /// New resources start with empty state. Resources carried over from a
    /// previous run keep their state and provisioner but take the current
    /// declaration's params and metadata. A shared resource declared by more
    /// than one workload must not have conflicting params or metadata.
    pub fn with_primed_resources(&self) -> Result<Self> {
        let mut out = self.clone();
        let mut primed: BTreeSet<ResourceUid> = BTreeSet::new();

        for (workload_name, workload) in &self.workloads {
            for (res_name, res) in &workload.spec.resources {
                let uid = ResourceUid::new(
                    workload_name,
                    res_name,
                    &res.resource_type,
                    res.class.as_deref(),
                    res.id.as_deref(),
                );

                match out.resources.get_mut(&uid) {
                    None => {
                        debug!("Priming new resource '{}'", uid);
                        out.resources.insert(
                            uid.clone(),
                            ResourceState {
                                resource_type: uid.resource_type().to_string(),
                                class: uid.class().to_string(),
                                id: uid.id().to_string(),
                                metadata: res.metadata.clone(),
                                params: res.params.clone(),
                                source_workload: workload_name.clone(),
                                ..Default::default()
                            },
                        );
                    }
                    Some(existing) if !primed.contains(&uid) => {
                        existing.metadata = res.metadata.clone();
                        existing.params = res.params.clone();
                        existing.source_workload = workload_name.clone();
                    }
                    Some(existing) => {
                        if let Some(params) = &res.params {
                            if existing.params.as_ref().is_some_and(|p| p != params) {
                                return Err(Error::DeclarationConflict {
                                    uid,
                                    field: "params",
                                });
                            }
                            existing.params = Some(params.clone());
                            existing.source_workload = workload_name.clone();
                        }
                        if let Some(metadata) = &res.metadata {
                            if existing.metadata.as_ref().is_some_and(|m| m != metadata) {
                                return Err(Error::DeclarationConflict {
                                    uid,
                                    field: "metadata",
                                });
                            }
                            existing.metadata = Some(metadata.clone());
                        }
                    }
                }
                primed.insert(uid);
            }
        }
        Ok(out)
    }

    /// Returns the output lookup of each resource declared by a workload,
    /// keyed by the workload-local resource name.
    pub fn resource_outputs_for_workload(
        &self,
        workload_name: &str,
    ) -> Result<BTreeMap<String, OutputLookupFn>> {
        let workload = self
            .workloads
            .get(workload_name)
            .ok_or_else(|| Error::WorkloadNotFound(workload_name.to_string()))?;

        workload
            .spec
            .resources
            .iter()
            .map(|(res_name, res)| {
                let uid = ResourceUid::new(
                    workload_name,
                    res_name,
                    &res.resource_type,
                    res.class.as_deref(),
                    res.id.as_deref(),
                );
                let state = self
                    .resources
                    .get(&uid)
                    .ok_or_else(|| Error::ResourceNotPrimed {
                        workload: workload_name.to_string(),
                        resource: res_name.clone(),
                        uid: uid.clone(),
                    })?;
                Ok((res_name.clone(), state.lookup_fn()))
            })
            .collect()
    }

    /// Builds the raw resolver for placeholders inside a workload: its
    /// metadata plus the outputs of its resources.
    pub fn substitution_function_for_workload(
        &self,
        workload_name: &str,
    ) -> Result<impl Fn(&str) -> Result<String> + Send + Sync + use<>> {
        let outputs = self.resource_outputs_for_workload(workload_name)?;
        let metadata = self
            .workloads
            .get(workload_name)
            .map(|w| w.spec.metadata.clone())
            .unwrap_or_default();
        Ok(build_substitution_function(metadata, outputs))
    }
}
