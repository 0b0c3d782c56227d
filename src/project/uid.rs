//! Resource identity.
//!
//! Every resource referenced by a workload gets a [`ResourceUid`] of the form
//! `type.class#scope`. The scope is the explicit id of a shared resource or
//! `workload.resource` for a workload-scoped one, so the same declaration in
//! several workloads collapses to one identity.

use crate::constants::DEFAULT_RESOURCE_CLASS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Stable identifier of a resource, ordered by its string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceUid(String);

impl ResourceUid {
    /// Derives the uid of a resource declaration.
    ///
    /// A declaration with an explicit `id` is shared across workloads;
    /// otherwise the uid is scoped to `workload.resource_name`.
    #[must_use]
    pub fn new(
        workload: &str,
        resource_name: &str,
        resource_type: &str,
        class: Option<&str>,
        id: Option<&str>,
    ) -> Self {
        let class = class.unwrap_or(DEFAULT_RESOURCE_CLASS);
        match id {
            Some(id) => Self(format!("{resource_type}.{class}#{id}")),
            None => Self(format!("{resource_type}.{class}#{workload}.{resource_name}")),
        }
    }

    /// Resource type (text before the first `.`).
    #[must_use]
    pub fn resource_type(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(t, _)| t)
    }

    /// Resource class (between the first `.` and the `#`).
    #[must_use]
    pub fn class(&self) -> &str {
        let head = self.0.split_once('#').map_or(self.0.as_str(), |(h, _)| h);
        head.split_once('.').map_or("", |(_, c)| c)
    }

    /// Resource id: the shared id or `workload.resource`.
    #[must_use]
    pub fn id(&self) -> &str {
        self.0.split_once('#').map_or("", |(_, id)| id)
    }

    /// Returns the uid as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidResourceUid {
            uid: s.to_string(),
            reason: reason.to_string(),
        };
        let (head, id) = s.split_once('#').ok_or_else(|| invalid("missing '#'"))?;
        let (resource_type, class) = head
            .split_once('.')
            .ok_or_else(|| invalid("missing '.' between type and class"))?;
        if resource_type.is_empty() {
            return Err(invalid("empty type"));
        }
        if class.is_empty() {
            return Err(invalid("empty class"));
        }
        if id.is_empty() {
            return Err(invalid("empty id"));
        }
        Ok(Self(s.to_string()))
    }
}

impl std::fmt::Display for ResourceUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceUid {
    /// Wraps a uid string without validation; use [`str::parse`] for user input.
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
