//! # Provisioning Constants
//!
//! Names, file layout and bounds shared by the state store, the provisioner
//! loader and the command provisioner.
//!
//! ## Cross-References
//!
//! - [`crate::project`]: Uses the uid defaults and state directory layout
//! - [`crate::provisioner`]: Uses the file suffix, builtin uris and output bound

// =============================================================================
// Resource Identity
// =============================================================================

/// Class assigned to resources that do not declare one.
pub const DEFAULT_RESOURCE_CLASS: &str = "default";

/// Class label shown for provisioners without a class constraint.
pub const ANY_CLASS_LABEL: &str = "(any)";

// =============================================================================
// State Directory Layout
// =============================================================================
//
// <project root>/
// └── .magikcompose/
//     ├── state.yaml
//     ├── *.provisioners.yaml
//     └── mounts/
// =============================================================================

/// Name of the project-local state directory.
pub const STATE_DIRECTORY_NAME: &str = ".magikcompose";

/// Name of the persisted state file inside the state directory.
pub const STATE_FILE_NAME: &str = "state.yaml";

/// Name of the mounts directory inside the state directory.
pub const MOUNTS_DIRECTORY_NAME: &str = "mounts";

/// File suffix that marks a provisioner descriptor file.
pub const PROVISIONERS_FILE_SUFFIX: &str = ".provisioners.yaml";

/// File the default provisioners are written to; sorts after user files.
pub const DEFAULT_PROVISIONERS_FILE_NAME: &str = "zz-default.provisioners.yaml";

/// Name of the environment manifest written next to the compose file.
pub const ENV_MANIFEST_FILE_NAME: &str = ".env";

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum size of a workload or provisioner file (1 MiB).
pub const MAX_MANIFEST_SIZE: usize = 1024 * 1024;

/// Maximum bytes read from a command provisioner's stdout (16 MiB).
///
/// A response larger than this is rejected rather than truncated, since a
/// truncated JSON document can never decode.
pub const MAX_COMMAND_OUTPUT_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Provisioner URIs
// =============================================================================

/// Scheme of declarative template provisioners.
pub const TEMPLATE_SCHEME: &str = "template";

/// Scheme of external command provisioners.
pub const COMMAND_SCHEME: &str = "cmd";

/// Uri of the builtin environment provisioner.
pub const ENVIRONMENT_PROVISIONER_URI: &str = "builtin://environment";

/// Resource type served by the builtin environment provisioner.
pub const ENVIRONMENT_RESOURCE_TYPE: &str = "environment";
