//! Placeholder substitution.
//!
//! Params, file contents and generated definitions may embed `${path.to.value}`
//! references. A reference is split on `.` (a `\.` keeps a literal dot inside a
//! key); the first part selects a root (`metadata` or `resources`) and the rest
//! is walked through that root's value tree. `$$` produces a literal `$`.
//!
//! Resolution is driven by a plain resolver function `Fn(&str) -> Result<String>`.
//! Two wrappers decide what happens when a lookup answers with
//! [`Error::DeferredVariable`]:
//!
//! - [`ImmediateResolver`] reads the variable from the environment now and
//!   fails if it is unset.
//! - [`DeferredResolver`] emits `${NAME}` / `${NAME?required}` so the runtime
//!   interpolates it later, and remembers every variable it emitted.

use crate::error::{Error, Result};
use crate::patch::Map;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// Matches `$$` or `${...}`.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\$|\{([^}]*)\})").expect("placeholder pattern is a valid regex")
});

/// Function resolving one reference (the text between `${` and `}`).
pub type Resolver<'a> = dyn Fn(&str) -> Result<String> + 'a;

/// Walks a resource's outputs by key path.
pub type OutputLookupFn = Arc<dyn Fn(&[String]) -> Result<Value> + Send + Sync>;

// =============================================================================
// Reference Parsing
// =============================================================================

/// Splits a reference on unescaped dots.
#[must_use]
pub fn split_ref_parts(reference: &str) -> Vec<String> {
    reference
        .replace(r"\.", "\0")
        .split('.')
        .map(|part| part.replace('\0', "."))
        .collect()
}

// =============================================================================
// Substitution
// =============================================================================

/// Replaces every placeholder in `src` with the resolver's answer.
pub fn substitute_string(src: &str, resolver: &Resolver<'_>) -> Result<String> {
    let mut failure = None;
    let replaced = PLACEHOLDER.replace_all(src, |caps: &Captures<'_>| {
        if failure.is_some() {
            return String::new();
        }
        if &caps[1] == "$" {
            return "$".to_string();
        }
        let reference = caps.get(2).map_or("", |m| m.as_str());
        match resolver(reference) {
            Ok(resolved) => resolved,
            Err(e) => {
                failure = Some(e);
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(replaced.into_owned()),
    }
}

/// Substitutes recursively through maps and sequences, returning a copy.
///
/// Errors are wrapped with the map key or sequence index they occurred under.
pub fn substitute(value: &Value, resolver: &Resolver<'_>) -> Result<Value> {
    match value {
        Value::String(s) => substitute_string(s, resolver).map(Value::String),
        Value::Object(map) => substitute_map(map, resolver).map(Value::Object),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| substitute(item, resolver).map_err(|e| e.under_key(i.to_string())))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Substitutes every value of a map.
pub fn substitute_map(map: &Map, resolver: &Resolver<'_>) -> Result<Map> {
    map.iter()
        .map(|(k, v)| {
            substitute(v, resolver)
                .map(|v| (k.clone(), v))
                .map_err(|e| e.under_key(k.clone()))
        })
        .collect()
}

// =============================================================================
// Context Resolution
// =============================================================================

/// Walks `keys` through a map tree.
pub fn map_lookup(root: &Map, keys: &[String]) -> Result<Value> {
    let mut current: Option<&Value> = None;
    for key in keys {
        let map = match current {
            None => root,
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(Error::Lookup(format!(
                    "cannot lookup key '{key}', context is not a map"
                )));
            }
        };
        current = Some(
            map.get(key)
                .ok_or_else(|| Error::Lookup(format!("key '{key}' not found")))?,
        );
    }
    Ok(current.cloned().unwrap_or_else(|| Value::Object(root.clone())))
}

/// Renders a resolved value into placeholder text.
fn render_value(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Builds the resolver for `metadata.*` and `resources.*` references.
pub fn build_substitution_function(
    metadata: Map,
    resources: BTreeMap<String, OutputLookupFn>,
) -> impl Fn(&str) -> Result<String> + Send + Sync {
    move |reference: &str| {
        let invalid = |reason: String| Error::InvalidReference {
            reference: reference.to_string(),
            reason,
        };
        let parts = split_ref_parts(reference);
        let resolved = match parts[0].as_str() {
            "metadata" => {
                if parts.len() < 2 {
                    return Err(invalid(
                        "requires at least a metadata key to lookup".to_string(),
                    ));
                }
                map_lookup(&metadata, &parts[1..]).map_err(|e| invalid(e.to_string()))?
            }
            "resources" => {
                if parts.len() < 2 {
                    return Err(invalid(
                        "requires at least a resource name to lookup".to_string(),
                    ));
                }
                let lookup = resources
                    .get(&parts[1])
                    .ok_or_else(|| invalid(format!("no known resource '{}'", parts[1])))?;
                if parts.len() == 2 {
                    return Ok(parts[1].clone());
                }
                match lookup(&parts[2..]) {
                    Ok(v) => v,
                    Err(deferred @ Error::DeferredVariable { .. }) => return Err(deferred),
                    Err(e) => return Err(invalid(e.to_string())),
                }
            }
            _ => {
                return Err(invalid(
                    "unknown reference root, use $$ to escape the substitution".to_string(),
                ));
            }
        };
        render_value(&resolved)
    }
}

// =============================================================================
// Evaluation Modes
// =============================================================================

/// Resolves deferred variables from the environment at generation time.
pub struct ImmediateResolver<F> {
    inner: F,
    env_lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl<F> ImmediateResolver<F>
where
    F: Fn(&str) -> Result<String>,
{
    /// Wraps `inner`, reading deferred variables from the process environment.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            env_lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replaces the environment lookup.
    #[must_use]
    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env_lookup = Box::new(lookup);
        self
    }

    /// Resolves `reference`, failing on variables that are not set.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        match (self.inner)(reference) {
            Err(Error::DeferredVariable { variable, required }) => (self.env_lookup)(&variable)
                .ok_or(Error::UnresolvedVariable {
                    reference: reference.to_string(),
                    variable,
                    required,
                }),
            other => other,
        }
    }
}

/// Emits runtime interpolation expressions for deferred variables.
pub struct DeferredResolver<F> {
    inner: F,
    deferred: Mutex<BTreeMap<String, bool>>,
}

impl<F> DeferredResolver<F>
where
    F: Fn(&str) -> Result<String>,
{
    /// Wraps `inner`.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            deferred: Mutex::new(BTreeMap::new()),
        }
    }

    /// Resolves `reference`, replacing deferred variables with `${NAME}` or
    /// `${NAME?required}`.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        match (self.inner)(reference) {
            Err(Error::DeferredVariable { variable, required }) => {
                let expression = if required {
                    format!("${{{variable}?required}}")
                } else {
                    format!("${{{variable}}}")
                };
                let mut deferred = self.deferred.lock().unwrap_or_else(PoisonError::into_inner);
                let entry = deferred.entry(variable).or_insert(false);
                *entry |= required;
                Ok(expression)
            }
            other => other,
        }
    }

    /// Every variable emitted so far, with whether any use was required.
    #[must_use]
    pub fn deferred_variables(&self) -> BTreeMap<String, bool> {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Renders a `.env` style manifest from variable names and their values at
/// generation time. Unknown values are written as empty assignments.
#[must_use]
pub fn env_manifest(variables: &BTreeMap<String, String>) -> String {
    variables
        .iter()
        .map(|(name, value)| format!("{name}={value}\n"))
        .collect()
}
