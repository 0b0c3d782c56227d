//! Tests for applying provisioner output to state, mounts and the compose
//! project.

use magikcompose::{
    ComposeProject, Error, Map, OutputLookupFn, ProvisionOutput, ResourceDecl, ResourceUid, State,
    Workload,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn map(value: Value) -> Map {
    match value {
        Value::Object(m) => m,
        other => panic!("not a map: {other}"),
    }
}

fn uid() -> ResourceUid {
    ResourceUid::new("web", "data", "volume", None, None)
}

/// A primed state with one resource whose mount root is `mounts`.
fn primed(mounts: &std::path::Path) -> State {
    let workload = Workload {
        metadata: map(json!({"name": "web"})),
        resources: [("data".to_string(), ResourceDecl::new("volume"))].into(),
        ..Default::default()
    };
    State::new("demo", mounts)
        .with_workload(workload, None, BTreeMap::new())
        .unwrap()
        .with_primed_resources()
        .unwrap()
}

// =============================================================================
// State Tests
// =============================================================================

#[test]
fn test_state_and_outputs_are_replaced() {
    let tmp = TempDir::new().unwrap();
    let mut state = primed(tmp.path());
    {
        let res = state.resources.get_mut(&uid()).unwrap();
        res.state = map(json!({"old": 1}));
        res.outputs = map(json!({"old": 1}));
    }

    let output = ProvisionOutput {
        resource_state: Some(map(json!({"new": 2}))),
        provisioner_uri: "template://v".to_string(),
        ..Default::default()
    };
    let mut project = ComposeProject::new("demo");
    let next = output.apply(&state, &uid(), &mut project).unwrap();

    let res = &next.resources[&uid()];
    assert_eq!(res.state, map(json!({"new": 2})));
    assert!(res.outputs.is_empty(), "missing outputs clear the old ones");
    assert_eq!(res.provisioner_uri, "template://v");
    assert_eq!(state.resources[&uid()].state, map(json!({"old": 1})));
}

#[test]
fn test_shared_state_is_merge_patched() {
    let tmp = TempDir::new().unwrap();
    let mut state = primed(tmp.path());
    state.shared_state = map(json!({"ns": {"a": 1, "b": 2}, "other": true}));

    let output = ProvisionOutput {
        shared_state: Some(map(json!({"ns": {"b": null, "c": 3}}))),
        ..Default::default()
    };
    let next = output
        .apply(&state, &uid(), &mut ComposeProject::default())
        .unwrap();
    assert_eq!(
        next.shared_state,
        map(json!({"ns": {"a": 1, "c": 3}, "other": true}))
    );
}

#[test]
fn test_missing_shared_state_leaves_it_alone() {
    let tmp = TempDir::new().unwrap();
    let mut state = primed(tmp.path());
    state.shared_state = map(json!({"keep": 1}));

    let next = ProvisionOutput::default()
        .apply(&state, &uid(), &mut ComposeProject::default())
        .unwrap();
    assert_eq!(next.shared_state, map(json!({"keep": 1})));
}

#[test]
fn test_output_lookup_fn_is_installed() {
    let tmp = TempDir::new().unwrap();
    let state = primed(tmp.path());
    let lookup: OutputLookupFn =
        Arc::new(|keys: &[String]| -> magikcompose::Result<Value> { Ok(json!(keys.join("/"))) });

    let output = ProvisionOutput {
        output_lookup_fn: Some(lookup),
        ..Default::default()
    };
    let next = output
        .apply(&state, &uid(), &mut ComposeProject::default())
        .unwrap();
    let res = &next.resources[&uid()];
    assert_eq!(
        res.output_lookup(&["a".to_string(), "b".to_string()]).unwrap(),
        json!("a/b")
    );
}

#[test]
fn test_unknown_resource() {
    let tmp = TempDir::new().unwrap();
    let state = primed(tmp.path());
    let other = ResourceUid::from("volume.default#web.other");
    let err = ProvisionOutput::default()
        .apply(&state, &other, &mut ComposeProject::default())
        .unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound(_)));
}

// =============================================================================
// Mount Tests
// =============================================================================

#[test]
fn test_directories_are_created_and_removed() {
    let tmp = TempDir::new().unwrap();
    let state = primed(tmp.path());
    std::fs::create_dir_all(tmp.path().join("old/nested")).unwrap();

    let output = ProvisionOutput {
        relative_directories: [
            ("a/b".to_string(), true),
            ("old".to_string(), false),
            ("never-existed".to_string(), false),
        ]
        .into(),
        ..Default::default()
    };
    output
        .apply(&state, &uid(), &mut ComposeProject::default())
        .unwrap();

    assert!(tmp.path().join("a/b").is_dir());
    assert!(!tmp.path().join("old").exists());
}

#[test]
fn test_files_are_written_and_removed() {
    let tmp = TempDir::new().unwrap();
    let state = primed(tmp.path());
    std::fs::write(tmp.path().join("stale.txt"), "x").unwrap();

    let output = ProvisionOutput {
        relative_file_contents: [
            ("conf/app.conf".to_string(), Some("key=value\n".to_string())),
            ("stale.txt".to_string(), None),
            ("missing.txt".to_string(), None),
        ]
        .into(),
        ..Default::default()
    };
    output
        .apply(&state, &uid(), &mut ComposeProject::default())
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(tmp.path().join("conf/app.conf")).unwrap(),
        "key=value\n"
    );
    assert!(!tmp.path().join("stale.txt").exists());
}

#[test]
fn test_paths_are_normalized() {
    let tmp = TempDir::new().unwrap();
    let state = primed(tmp.path());

    let output = ProvisionOutput {
        relative_file_contents: [("a/../b/./c.txt".to_string(), Some("c".to_string()))].into(),
        ..Default::default()
    };
    output
        .apply(&state, &uid(), &mut ComposeProject::default())
        .unwrap();
    assert!(tmp.path().join("b/c.txt").is_file());
}

#[test]
fn test_escaping_paths_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let mounts = tmp.path().join("mounts");
    std::fs::create_dir(&mounts).unwrap();
    let state = primed(&mounts);

    for path in ["../outside.txt", "a/../../outside.txt", "/tmp/outside.txt"] {
        let output = ProvisionOutput {
            relative_file_contents: [(path.to_string(), Some("x".to_string()))].into(),
            ..Default::default()
        };
        let err = output
            .apply(&state, &uid(), &mut ComposeProject::default())
            .unwrap_err();
        assert!(matches!(err, Error::PathEscapesMount { .. }), "{path}: {err}");
    }
    assert!(!tmp.path().join("outside.txt").exists());

    let output = ProvisionOutput {
        relative_directories: [("..".to_string(), false)].into(),
        ..Default::default()
    };
    assert!(output
        .apply(&state, &uid(), &mut ComposeProject::default())
        .is_err());
    assert!(mounts.is_dir());
}

// =============================================================================
// Compose Tests
// =============================================================================

#[test]
fn test_compose_definitions_are_merged_by_name() {
    let tmp = TempDir::new().unwrap();
    let state = primed(tmp.path());
    let mut project = ComposeProject::new("demo");
    project
        .volumes
        .insert("existing".to_string(), map(json!({"driver": "local"})));
    project
        .volumes
        .insert("replaced".to_string(), map(json!({"driver": "old"})));

    let output = ProvisionOutput {
        compose_volumes: [("replaced".to_string(), map(json!({"driver": "new"})))].into(),
        compose_networks: [("net".to_string(), map(json!({})))].into(),
        compose_services: [("svc".to_string(), map(json!({"image": "busybox"})))].into(),
        ..Default::default()
    };
    output.apply(&state, &uid(), &mut project).unwrap();

    assert_eq!(project.volumes["existing"], map(json!({"driver": "local"})));
    assert_eq!(project.volumes["replaced"], map(json!({"driver": "new"})));
    assert!(project.networks.contains_key("net"));
    assert_eq!(project.services["svc"], map(json!({"image": "busybox"})));

    let yaml = project.to_yaml().unwrap();
    assert!(yaml.contains("name: demo"));
    assert!(yaml.contains("svc:"));
}
