//! Project model: resource identity, state snapshots, dependency ordering,
//! the generated compose project and on-disk persistence.

mod compose;
mod graph;
mod state;
mod store;
mod uid;

pub use compose::ComposeProject;
pub use state::{ResourceState, State, WorkloadState};
pub use store::{StateDirectory, write_atomic};
pub use uid::ResourceUid;
