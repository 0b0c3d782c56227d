//! Provisioning orchestration.
//!
//! Resources are provisioned one at a time in dependency order, each seeing
//! the state snapshot produced by the resources before it:
//!
//! ```text
//! for uid in sorted_resource_uids():
//!     params   = substitute(params, metadata + dependency outputs)   (immediate)
//!     p        = registry.find(uid)          (drift guard on the uri)
//!     output   = p.provision(input)
//!     state    = output.apply(state, uid, project)
//! ```
//!
//! The first failure aborts the run. The input snapshot is never modified, so
//! the caller decides whether anything of a failed run is kept.

use crate::error::{Error, Result};
use crate::patch::Map;
use crate::project::{ComposeProject, ResourceUid, State};
use crate::provisioner::{Input, NetworkService, ProvisionerRegistry, ServicePort};
use crate::substitution::{ImmediateResolver, substitute_map};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Resource uid and its output keys, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceListing {
    pub uid: ResourceUid,
    /// Output keys, sorted.
    pub outputs: Vec<String>,
}

/// Builds how each workload can be reached: its service name and its ports by
/// name, plus aliases by port number where that does not clash with a name.
#[must_use]
pub fn build_workload_services(state: &State) -> BTreeMap<String, NetworkService> {
    state
        .workloads
        .iter()
        .map(|(name, workload)| {
            let mut ports = BTreeMap::new();
            if let Some(service) = &workload.spec.service {
                for (port_name, spec) in &service.ports {
                    ports.insert(
                        port_name.clone(),
                        ServicePort {
                            name: port_name.clone(),
                            port: spec.port,
                            target_port: spec.target_port.unwrap_or(spec.port),
                            protocol: spec.protocol.unwrap_or_default(),
                        },
                    );
                }
                for (port_name, spec) in &service.ports {
                    let alias = spec.port.to_string();
                    if !ports.contains_key(&alias) {
                        let port = ports[port_name].clone();
                        ports.insert(alias, port);
                    }
                }
            }
            (
                name.clone(),
                NetworkService {
                    service_name: name.clone(),
                    ports,
                },
            )
        })
        .collect()
}

/// Provisions every primed resource, returning the final state snapshot.
///
/// # Errors
///
/// - The dependency order cannot be determined
/// - Params fail to resolve
/// - No provisioner matches, or a different one than last time
/// - A provisioner fails or output cannot be applied
/// - `cancel` fires
pub async fn provision_resources(
    state: &State,
    registry: &ProvisionerRegistry,
    project: &mut ComposeProject,
    cancel: &CancellationToken,
) -> Result<State> {
    let ordered = state.sorted_resource_uids()?;
    let workload_services = build_workload_services(state);
    let mut out = state.clone();

    for uid in ordered {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let res = out
            .resources
            .get(&uid)
            .ok_or_else(|| Error::ResourceNotFound(uid.clone()))?;

        let params = match &res.params {
            Some(params) if !params.is_empty() => {
                let immediate =
                    ImmediateResolver::new(out.substitution_function_for_workload(&res.source_workload)?);
                let resolver = |reference: &str| immediate.resolve(reference);
                substitute_map(params, &resolver).map_err(|e| Error::ParamSubstitution {
                    uid: uid.clone(),
                    source: Box::new(e),
                })?
            }
            _ => Map::new(),
        };

        let provisioner = registry.find(&uid)?;
        if !res.provisioner_uri.is_empty() && res.provisioner_uri != provisioner.uri() {
            return Err(Error::ProvisionerDrift {
                uid: uid.clone(),
                previous: res.provisioner_uri.clone(),
                current: provisioner.uri().to_string(),
            });
        }

        let input = Input {
            resource_uid: uid.clone(),
            resource_type: uid.resource_type().to_string(),
            resource_class: uid.class().to_string(),
            resource_id: uid.id().to_string(),
            resource_params: params,
            resource_metadata: res.metadata.clone().unwrap_or_default(),
            source_workload: res.source_workload.clone(),
            workload_services: workload_services.clone(),
            resource_state: res.state.clone(),
            shared_state: out.shared_state.clone(),
            compose_project_name: out.project_name.clone(),
            mount_directory_path: out.mounts_directory.clone(),
        };

        debug!("Provisioning resource '{}' with '{}'", uid, provisioner.uri());
        let mut output = provisioner
            .provision(cancel, &input)
            .await
            .map_err(|e| match e {
                Error::Cancelled => e,
                other => other.provisioning(&uid),
            })?;
        output.provisioner_uri = provisioner.uri().to_string();

        out = output
            .apply(&out, &uid, project)
            .map_err(|e| Error::ApplyFailed {
                uid: uid.clone(),
                source: Box::new(e),
            })?;
    }

    info!("Provisioned {} resources", out.resources.len());
    Ok(out)
}

/// Lists resources in dependency order with their output keys.
pub fn list_resources(state: &State) -> Result<Vec<ResourceListing>> {
    state
        .sorted_resource_uids()?
        .into_iter()
        .map(|uid| {
            let outputs = resource_outputs(state, &uid)?.keys().cloned().collect();
            Ok(ResourceListing { uid, outputs })
        })
        .collect()
}

/// Returns the static outputs of a resource from its last provisioning.
pub fn resource_outputs(state: &State, uid: &ResourceUid) -> Result<Map> {
    state
        .resources
        .get(uid)
        .map(|res| res.outputs.clone())
        .ok_or_else(|| Error::ResourceNotFound(uid.clone()))
}
