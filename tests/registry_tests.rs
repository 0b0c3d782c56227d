//! Tests for provisioner file loading and matching.

use magikcompose::{
    Error, EphemeralProvisioner, Provisioner, ProvisionOutput, ProvisionerDescriptor,
    ProvisionerRegistry, ResourceUid, load_provisioners, load_provisioners_from_directory,
};
use std::sync::Arc;
use tempfile::TempDir;

fn uid(s: &str) -> ResourceUid {
    ResourceUid::from(s)
}

fn ephemeral(uri: &str, target: &str) -> Arc<dyn Provisioner> {
    Arc::new(EphemeralProvisioner::new(uri, uid(target), |_| {
        Ok(ProvisionOutput::default())
    }))
}

// =============================================================================
// Descriptor Matching Tests
// =============================================================================

#[test]
fn test_descriptor_matches_type_only() {
    let d = ProvisionerDescriptor::new("template://a", "postgres");
    assert!(d.matches(&uid("postgres.default#w.db")));
    assert!(d.matches(&uid("postgres.large#shared")));
    assert!(!d.matches(&uid("redis.default#w.db")));
}

#[test]
fn test_descriptor_matches_class_and_id() {
    let mut d = ProvisionerDescriptor::new("template://a", "postgres");
    d.class = Some("large".to_string());
    assert!(d.matches(&uid("postgres.large#w.db")));
    assert!(!d.matches(&uid("postgres.default#w.db")));

    d.id = Some("shared".to_string());
    assert!(d.matches(&uid("postgres.large#shared")));
    assert!(!d.matches(&uid("postgres.large#w.db")));
}

// =============================================================================
// Loading Tests
// =============================================================================

#[test]
fn test_load_template_and_command_entries() {
    let raw = br#"
- uri: template://example/volume
  type: volume
  class: fast
  description: A volume
  supported_params: [size]
  expected_outputs: [source, type]
  outputs: |
    source: x
- uri: cmd://python
  type: bucket
  args: ["./bucket.py", "--verbose"]
  params: [region]
  outputs: [name]
"#;
    let loaded = load_provisioners(raw).unwrap();
    assert_eq!(loaded.len(), 2);

    assert_eq!(loaded[0].uri(), "template://example/volume");
    assert_eq!(loaded[0].descriptor().class.as_deref(), Some("fast"));
    assert_eq!(loaded[0].descriptor().expected_outputs, vec!["source", "type"]);
    assert!(loaded[0].matches(&uid("volume.fast#w.v")));
    assert!(!loaded[0].matches(&uid("volume.default#w.v")));

    assert_eq!(loaded[1].uri(), "cmd://python");
    assert_eq!(loaded[1].descriptor().supported_params, vec!["region"]);
    assert!(loaded[1].matches(&uid("bucket.default#w.b")));
}

#[test]
fn test_provisioner_debug_shows_uri() {
    let loaded = load_provisioners(b"- uri: template://x\n  type: thing\n").unwrap();
    assert_eq!(format!("{:?}", loaded[0]), r#"Provisioner { uri: "template://x" }"#);
    assert_eq!(format!("{loaded:?}"), r#"[Provisioner { uri: "template://x" }]"#);
}

#[test]
fn test_load_empty_list() {
    assert!(load_provisioners(b"[]").unwrap().is_empty());
}

#[test]
fn test_load_rejects_non_list() {
    let err = load_provisioners(b"uri: template://x").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_load_rejects_unsupported_scheme() {
    let raw = b"- uri: template://ok\n  type: a\n- uri: http://nope\n  type: b\n";
    let err = load_provisioners(raw).unwrap_err();
    assert_eq!(err.to_string(), "1: unsupported provisioner type 'http'");
}

#[test]
fn test_load_rejects_missing_scheme() {
    let err = load_provisioners(b"- uri: nothing\n  type: a\n").unwrap_err();
    assert!(
        err.to_string().starts_with("0: nothing: failed to parse:"),
        "{err}"
    );
    assert!(err.to_string().contains("missing uri scheme"));
}

#[test]
fn test_load_error_names_index_and_uri() {
    let raw = b"- uri: template://ok\n  type: a\n- uri: template://bad\n";
    let err = load_provisioners(raw).unwrap_err();
    assert_eq!(
        err.to_string(),
        "1: template://bad: failed to parse: invalid input: type not set"
    );
}

#[test]
fn test_load_rejects_unknown_template_field() {
    let raw = b"- uri: template://x\n  type: a\n  bogus: true\n";
    let err = load_provisioners(raw).unwrap_err();
    assert!(err.to_string().contains("bogus"), "{err}");
}

#[test]
fn test_load_rejects_invalid_command_uri() {
    let raw = b"- uri: cmd://user@python\n  type: a\n";
    let err = load_provisioners(raw).unwrap_err();
    assert!(err.to_string().contains("cannot contain user info"), "{err}");
}

#[test]
fn test_load_rejects_oversized_file() {
    let raw = vec![b'#'; magikcompose::MAX_MANIFEST_SIZE + 1];
    assert!(matches!(load_provisioners(&raw), Err(Error::InvalidInput(_))));
}

#[test]
fn test_load_directory_in_lexical_order() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("b.provisioners.yaml"),
        "- uri: template://b\n  type: thing\n",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("a.provisioners.yaml"),
        "- uri: template://a1\n  type: thing\n- uri: template://a2\n  type: thing\n",
    )
    .unwrap();
    std::fs::write(tmp.path().join("ignored.yaml"), "not: a list").unwrap();
    std::fs::create_dir(tmp.path().join("dir.provisioners.yaml")).unwrap();

    let loaded = load_provisioners_from_directory(tmp.path(), ".provisioners.yaml").unwrap();
    let uris: Vec<&str> = loaded.iter().map(|p| p.uri()).collect();
    assert_eq!(uris, vec!["template://a1", "template://a2", "template://b"]);
}

#[test]
fn test_load_directory_names_failing_file() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("bad.provisioners.yaml"), "- uri: ftp://x\n").unwrap();

    let err = load_provisioners_from_directory(tmp.path(), ".provisioners.yaml").unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to load 'bad.provisioners.yaml': 0: unsupported provisioner type 'ftp'"
    );
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_find_first_match_wins() {
    let mut registry = ProvisionerRegistry::new();
    registry.extend(load_provisioners(b"- uri: template://first\n  type: thing\n").unwrap());
    registry.extend(load_provisioners(b"- uri: template://second\n  type: thing\n").unwrap());

    let found = registry.find(&uid("thing.default#w.r")).unwrap();
    assert_eq!(found.uri(), "template://first");
}

#[test]
fn test_find_respects_registration_order_for_exact_matches() {
    let mut registry = ProvisionerRegistry::new();
    registry.extend(load_provisioners(b"- uri: template://generic\n  type: thing\n").unwrap());
    registry.push(ephemeral("test://exact", "thing.default#w.r"));

    assert_eq!(
        registry.find(&uid("thing.default#w.r")).unwrap().uri(),
        "template://generic"
    );
    assert_eq!(registry.all().len(), 2);
}

#[test]
fn test_find_without_match() {
    let registry = ProvisionerRegistry::new();
    let err = registry.find(&uid("thing.default#w.r")).err().unwrap();
    assert_eq!(
        err.to_string(),
        "resource 'thing.default#w.r' is not supported by any provisioner"
    );
}

#[test]
fn test_describe_sorts_and_labels_any_class() {
    let raw = br#"
- uri: template://x
  type: thing
  description: does things
  supported_params: [zeta, alpha]
  expected_outputs: [out-b, out-a]
- uri: template://y
  type: other
  class: special
"#;
    let mut registry = ProvisionerRegistry::new();
    registry.extend(load_provisioners(raw).unwrap());

    let rows = registry.describe();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].uri, "template://x");
    assert_eq!(rows[0].class, "(any)");
    assert_eq!(rows[0].params, vec!["alpha", "zeta"]);
    assert_eq!(rows[0].outputs, vec!["out-a", "out-b"]);
    assert_eq!(rows[0].description, "does things");
    assert_eq!(rows[1].class, "special");
}
