//! # magikcompose
//!
//! **Resource Provisioning Engine for Compose Projects**
//!
//! Workloads declare abstract resources (a database, a volume, a route). This
//! crate resolves every declared resource into concrete artifacts: persisted
//! state, outputs other resources and workloads can reference, files under a
//! mount root, and service, volume and network definitions merged into a
//! compose project.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          magikcompose                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                       State Store                           │    │
//! │  │  with_workload → with_primed_resources → sorted_resource_uids│   │
//! │  │  copy-on-write snapshots │ ResourceUid type.class#scope     │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                   Orchestrator                            │      │
//! │  │  substitute params (immediate) → match → provision → apply│      │
//! │  │  drift guard │ cancellation │ first error aborts          │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                   Output Materializer                     │      │
//! │  │  always-replace state │ shared merge patch │ mount root   │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                      Provisioners                                   │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────┐              │
//! │  │  template:// │  │    cmd://     │  │  builtin://  │              │
//! │  │  Handlebars  │  │  JSON stdin / │  │  environment │              │
//! │  │  stages      │  │  stdout       │  │  (deferred)  │              │
//! │  └──────────────┘  └───────────────┘  └──────────────┘              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Placeholders
//!
//! Params may reference workload metadata and the outputs of sibling
//! resources:
//!
//! ```yaml
//! resources:
//!   db:
//!     type: postgres
//!   cache:
//!     type: redis
//!     params:
//!       upstream: ${resources.db.host}
//! ```
//!
//! `cache` depends on `db` and is provisioned after it. References that form a
//! cycle, or name a resource the workload does not declare, are rejected
//! before anything is provisioned.
//!
//! # Safety Properties
//!
//! - **Mount Confinement**: provisioner paths are normalized lexically and
//!   must stay under the mount root (see [`ProvisionOutput::apply`]).
//! - **Drift Guard**: a resource is only ever provisioned by the provisioner
//!   that provisioned it first.
//! - **Strict Protocol**: command provisioner responses with unknown fields
//!   are rejected.
//! - **Size Limits**: `MAX_MANIFEST_SIZE` for input documents and
//!   `MAX_COMMAND_OUTPUT_SIZE` for command provisioner responses.
//!
//! # Example
//!
//! ```rust,ignore
//! use magikcompose::{ComposeProject, ProvisionerRegistry, State, Workload, provision_resources};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> magikcompose::Result<()> {
//!     let workload = Workload::from_yaml(&std::fs::read("score.yaml")?)?;
//!     let state = State::new("demo", ".magikcompose/mounts")
//!         .with_workload(workload, None, Default::default())?
//!         .with_primed_resources()?;
//!
//!     let mut registry = ProvisionerRegistry::new();
//!     registry.extend(magikcompose::load_provisioners(&std::fs::read("default.provisioners.yaml")?)?);
//!
//!     let mut project = ComposeProject::new("demo");
//!     let state = provision_resources(&state, &registry, &mut project, &CancellationToken::new()).await?;
//!     println!("{}", project.to_yaml()?);
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod materialize;
pub mod orchestrator;
pub mod patch;
pub mod project;
pub mod provisioner;
pub mod substitution;
pub mod workload;

// Re-exports
pub use constants::*;
pub use error::{Error, Result};
pub use orchestrator::{
    ResourceListing, build_workload_services, list_resources, provision_resources,
    resource_outputs,
};
pub use patch::{Map, patch_map, patch_optional};
pub use project::{
    ComposeProject, ResourceState, ResourceUid, State, StateDirectory, WorkloadState, write_atomic,
};
pub use provisioner::{
    CommandProvisioner, EnvironmentFallback, EnvironmentProvisioner, EphemeralProvisioner, Input,
    NetworkService, ProvisionOutput, Provisioner, ProvisionerDescriptor, ProvisionerRegistry,
    ProvisionerSummary, ServicePort, TemplateProvisioner, load_provisioners,
    load_provisioners_from_directory,
};
pub use substitution::{
    DeferredResolver, ImmediateResolver, OutputLookupFn, build_substitution_function,
    env_manifest, substitute, substitute_map, substitute_string,
};
pub use workload::{Protocol, ResourceDecl, ServicePortSpec, Workload, WorkloadService};
