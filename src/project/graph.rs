//! Dependency ordering of resources.
//!
//! A resource whose params contain `${resources.<name>...}` depends on the
//! named resource of the same workload and must be provisioned after it. The
//! order is produced with Kahn's algorithm, emitting each frontier sorted by
//! uid so the result is identical across runs.

use super::state::State;
use super::uid::ResourceUid;
use crate::error::{Error, Result};
use crate::substitution::{split_ref_parts, substitute_map};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

impl State {
    /// Returns the uids of all declared resources in dependency order.
    ///
    /// # Errors
    ///
    /// - A params placeholder names an undeclared resource
    /// - The params references form a cycle
    pub fn sorted_resource_uids(&self) -> Result<Vec<ResourceUid>> {
        // uid -> uids it is still waiting on
        let mut incoming: BTreeMap<ResourceUid, BTreeSet<ResourceUid>> = BTreeMap::new();

        for (workload_name, workload) in &self.workloads {
            for res_name in workload.spec.resources.keys() {
                let (uid, deps) = self.resource_dependencies(workload_name, res_name)?;
                incoming.entry(uid).or_default().extend(deps);
            }
        }

        let mut output = Vec::with_capacity(incoming.len());
        let mut frontier: BTreeSet<ResourceUid> = incoming
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(uid, _)| uid.clone())
            .collect();
        incoming.retain(|_, deps| !deps.is_empty());

        while !frontier.is_empty() {
            let emitted = std::mem::take(&mut frontier);
            for deps in incoming.values_mut() {
                deps.retain(|dep| !emitted.contains(dep));
            }
            incoming.retain(|uid, deps| {
                if deps.is_empty() {
                    frontier.insert(uid.clone());
                    false
                } else {
                    true
                }
            });
            output.extend(emitted);
        }

        if !incoming.is_empty() {
            return Err(Error::DependencyCycle);
        }
        Ok(output)
    }

    /// Scans one declaration's params for references to sibling resources.
    fn resource_dependencies(
        &self,
        workload_name: &str,
        res_name: &str,
    ) -> Result<(ResourceUid, BTreeSet<ResourceUid>)> {
        let workload = &self.workloads[workload_name].spec;
        let res = &workload.resources[res_name];
        let uid = ResourceUid::new(
            workload_name,
            res_name,
            &res.resource_type,
            res.class.as_deref(),
            res.id.as_deref(),
        );

        let Some(params) = &res.params else {
            return Ok((uid, BTreeSet::new()));
        };

        let deps = RefCell::new(BTreeSet::new());
        let record = |reference: &str| -> Result<String> {
            let parts = split_ref_parts(reference);
            if parts.len() > 1 && parts[0] == "resources" {
                let target = workload.resources.get(&parts[1]).ok_or_else(|| {
                    Error::UnknownResourceReference {
                        workload: workload_name.to_string(),
                        resource: res_name.to_string(),
                        name: parts[1].clone(),
                    }
                })?;
                deps.borrow_mut().insert(ResourceUid::new(
                    workload_name,
                    &parts[1],
                    &target.resource_type,
                    target.class.as_deref(),
                    target.id.as_deref(),
                ));
            }
            Ok(reference.to_string())
        };
        substitute_map(params, &record).map_err(unwrap_key_path)?;

        Ok((uid, deps.into_inner()))
    }
}

/// Strips the key path wrapping added by substitution so the reference error
/// surfaces with its workload and resource context.
fn unwrap_key_path(err: Error) -> Error {
    match err {
        Error::Substitution { source, .. } => unwrap_key_path(*source),
        other => other,
    }
}
