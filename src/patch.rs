//! JSON merge patch (RFC 7386) over [`Map`] trees.
//!
//! Used to fold a provisioner's shared-state delta into the project shared
//! state without disturbing keys the delta does not mention.

use serde_json::{Map as JsonMap, Value};

/// Key/value tree used for params, metadata, state, outputs and shared state.
pub type Map = JsonMap<String, Value>;

/// Applies `patch` to `current` and returns the merged map.
///
/// Neither input is modified. A `null` in the patch deletes the key, a nested
/// map recurses (replacing a non-map target with an empty map first) and any
/// other value replaces the target wholesale, sequences included.
#[must_use]
pub fn patch_map(current: &Map, patch: &Map) -> Map {
    let mut out = current.clone();
    for (key, patch_value) in patch {
        match patch_value {
            Value::Null => {
                out.remove(key);
            }
            Value::Object(nested) => {
                let merged = match out.get(key) {
                    Some(Value::Object(existing)) => patch_map(existing, nested),
                    _ => patch_map(&Map::new(), nested),
                };
                out.insert(key.clone(), Value::Object(merged));
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

/// Applies a patch to an optional map, treating `None` as empty.
#[must_use]
pub fn patch_optional(current: Option<&Map>, patch: &Map) -> Map {
    match current {
        Some(current) => patch_map(current, patch),
        None => patch_map(&Map::new(), patch),
    }
}
