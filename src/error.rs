//! Error types for the provisioning engine.

use crate::project::ResourceUid;
use std::path::PathBuf;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while priming, ordering, provisioning and
/// materializing resources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Declaration Errors
    // =========================================================================
    /// A shared resource was declared twice with different params or metadata.
    #[error("resource '{uid}': multiple definitions with different {field}")]
    DeclarationConflict {
        uid: ResourceUid,
        field: &'static str,
    },

    /// A params placeholder names a resource the workload does not declare.
    #[error("workload '{workload}' resource '{resource}': refers to unknown resource name '{name}'")]
    UnknownResourceReference {
        workload: String,
        resource: String,
        name: String,
    },

    /// Resource params reference each other in a loop.
    #[error("a cycle exists involving resource param placeholders")]
    DependencyCycle,

    /// The string form of a resource uid could not be parsed.
    #[error("invalid resource uid '{uid}': {reason}")]
    InvalidResourceUid { uid: String, reason: String },

    /// Workload is not known to the state.
    #[error("workload '{0}': does not exist")]
    WorkloadNotFound(String),

    /// Resource declared by a workload has not been primed yet.
    #[error("workload '{workload}': resource '{resource}' ({uid}) is not primed")]
    ResourceNotPrimed {
        workload: String,
        resource: String,
        uid: ResourceUid,
    },

    /// Resource is not present in the state.
    #[error("resource '{0}' not found")]
    ResourceNotFound(ResourceUid),

    /// Input document failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // Provisioner Selection Errors
    // =========================================================================
    /// No registered provisioner matches the resource.
    #[error("resource '{0}' is not supported by any provisioner")]
    NoMatchingProvisioner(ResourceUid),

    /// The resource was provisioned earlier by a different provisioner.
    #[error(
        "resource '{uid}' was previously provisioned by '{previous}' but now matches '{current}' - undefined behavior"
    )]
    ProvisionerDrift {
        uid: ResourceUid,
        previous: String,
        current: String,
    },

    /// Provisioner uri is malformed or uses an unsupported form.
    #[error("invalid provisioner uri '{uri}': {reason}")]
    InvalidProvisionerUri { uri: String, reason: String },

    /// A provisioner file entry failed to load.
    #[error("{index}: {uri}: failed to parse: {reason}")]
    ProvisionerLoad {
        index: usize,
        uri: String,
        reason: String,
    },

    /// A provisioner file entry uses a scheme no provisioner family handles.
    #[error("{index}: unsupported provisioner type '{scheme}'")]
    UnsupportedProvisioner { index: usize, scheme: String },

    /// A provisioner file could not be read or loaded.
    #[error("failed to load '{file}': {source}")]
    ProvisionerFile {
        file: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Substitution Errors
    // =========================================================================
    /// A placeholder reference could not be resolved.
    #[error("invalid ref '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Walking an outputs or metadata tree failed.
    #[error("{0}")]
    Lookup(String),

    /// The value is only known at deploy time through an environment variable.
    ///
    /// Lookups return this as a signal; substitution wrappers decide whether
    /// to resolve it now or emit a runtime interpolation expression.
    #[error("environment variable '{variable}' must be resolved")]
    DeferredVariable { variable: String, required: bool },

    /// Immediate substitution hit a deferred variable that is not set.
    #[error("invalid ref '{reference}': environment variable '{variable}' must be resolved (required: {required})")]
    UnresolvedVariable {
        reference: String,
        variable: String,
        required: bool,
    },

    /// Substitution failed below the given map key or sequence index.
    #[error("{key}: {source}")]
    Substitution {
        key: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    /// Params of a resource could not be resolved.
    #[error("failed to substitute params for resource '{uid}': {source}")]
    ParamSubstitution {
        uid: ResourceUid,
        #[source]
        source: Box<Error>,
    },

    /// The matched provisioner failed.
    #[error("resource '{uid}': failed to provision: {source}")]
    ProvisionFailed {
        uid: ResourceUid,
        #[source]
        source: Box<Error>,
    },

    /// Applying a provisioner result failed.
    #[error("resource '{uid}': failed to apply outputs: {source}")]
    ApplyFailed {
        uid: ResourceUid,
        #[source]
        source: Box<Error>,
    },

    /// A named template stage failed to parse, render or decode.
    #[error("{stage} template failed: {reason}")]
    TemplateStage { stage: &'static str, reason: String },

    /// Command provisioner subprocess could not run or exited non-zero.
    #[error("failed to execute cmd provisioner '{command}': {reason}")]
    CommandFailed { command: String, reason: String },

    /// Command provisioner wrote an unusable response.
    #[error("failed to decode output from cmd provisioner: {0}")]
    CommandOutput(String),

    /// Provisioning was cancelled by the caller.
    #[error("provisioning cancelled")]
    Cancelled,

    // =========================================================================
    // Materialization Errors
    // =========================================================================
    /// A relative path tried to leave the mounts directory.
    #[error("path '{path}' is not confined to the mounts directory")]
    PathEscapesMount { path: String },

    /// Creating or removing a mount path failed.
    #[error("failed to materialize '{path}': {reason}")]
    Materialize { path: PathBuf, reason: String },

    // =========================================================================
    // State Directory Errors
    // =========================================================================
    /// Persisted state could not be read or decoded.
    #[error("failed to load state from {path}: {reason}")]
    StateLoadFailed { path: PathBuf, reason: String },

    /// Persisted state could not be written.
    #[error("failed to write state to {path}: {reason}")]
    StateWriteFailed { path: PathBuf, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps this error with the resource whose provisioner produced it.
    pub(crate) fn provisioning(self, uid: &ResourceUid) -> Self {
        Self::ProvisionFailed {
            uid: uid.clone(),
            source: Box::new(self),
        }
    }

    /// Wraps this error with the map key or index it was found under.
    pub(crate) fn under_key(self, key: impl Into<String>) -> Self {
        Self::Substitution {
            key: key.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
