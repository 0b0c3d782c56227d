//! Tests for command provisioners.
//!
//! These run `sh` as the provisioner executable, so they are unix only.

#![cfg(unix)]

use magikcompose::{
    CommandProvisioner, Error, Input, MAX_COMMAND_OUTPUT_SIZE, Map, Provisioner, ResourceUid,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn input() -> Input {
    let uid = ResourceUid::from("bucket.default#web.files");
    Input {
        resource_type: uid.resource_type().to_string(),
        resource_class: uid.class().to_string(),
        resource_id: uid.id().to_string(),
        resource_uid: uid,
        resource_params: Map::new(),
        resource_metadata: Map::new(),
        source_workload: "web".to_string(),
        workload_services: BTreeMap::new(),
        resource_state: Map::new(),
        shared_state: Map::new(),
        compose_project_name: "demo".to_string(),
        mount_directory_path: PathBuf::from("/mounts"),
    }
}

fn shell(script: &str) -> CommandProvisioner {
    let entry = json!({
        "uri": "cmd://sh",
        "type": "bucket",
        "args": ["-c", script],
    });
    CommandProvisioner::parse(serde_yaml::to_value(entry).unwrap()).unwrap()
}

// =============================================================================
// Parsing Tests
// =============================================================================

#[test]
fn test_parse_reads_args_and_aliases() {
    let entry = json!({
        "uri": "cmd://python",
        "type": "bucket",
        "class": "s3",
        "args": ["./bucket.py"],
        "supported_params": ["region"],
        "expected_outputs": ["name"],
    });
    let p = CommandProvisioner::parse(serde_yaml::to_value(entry).unwrap()).unwrap();
    assert_eq!(p.args(), ["./bucket.py"]);
    assert_eq!(p.descriptor().supported_params, vec!["region"]);
    assert_eq!(p.descriptor().expected_outputs, vec!["name"]);
    assert_eq!(p.descriptor().class.as_deref(), Some("s3"));
}

#[test]
fn test_parse_rejects_unknown_field() {
    let entry = json!({"uri": "cmd://python", "type": "bucket", "init": "x"});
    assert!(CommandProvisioner::parse(serde_yaml::to_value(entry).unwrap()).is_err());
}

// =============================================================================
// Protocol Tests
// =============================================================================

#[tokio::test]
async fn test_output_is_decoded() {
    let p = shell(
        r#"cat > /dev/null; echo '{"resource_state": {"n": 1}, "resource_outputs": {"name": "b"}, "relative_directories": {"d": true}}'"#,
    );
    let out = p.provision(&CancellationToken::new(), &input()).await.unwrap();
    assert_eq!(out.resource_state.unwrap()["n"], json!(1));
    assert_eq!(out.resource_outputs.unwrap()["name"], json!("b"));
    assert_eq!(out.relative_directories["d"], true);
    assert!(out.shared_state.is_none());
}

#[tokio::test]
async fn test_null_maps_decode_as_empty() {
    let p = shell(
        r#"cat > /dev/null; echo '{"resource_state": null, "resource_outputs": {"k": "v"}, "shared_state": null, "relative_directories": null, "relative_file_contents": null, "compose_networks": null, "compose_volumes": null, "compose_services": null}'"#,
    );
    let out = p.provision(&CancellationToken::new(), &input()).await.unwrap();
    assert_eq!(out.resource_outputs.unwrap()["k"], json!("v"));
    assert!(out.resource_state.is_none());
    assert!(out.relative_directories.is_empty());
    assert!(out.relative_file_contents.is_empty());
    assert!(out.compose_networks.is_empty());
    assert!(out.compose_volumes.is_empty());
    assert!(out.compose_services.is_empty());
}

#[tokio::test]
async fn test_input_is_written_to_stdin() {
    let p = shell(r#"grep -q '"compose_project_name":"demo"' && echo '{}'"#);
    let out = p.provision(&CancellationToken::new(), &input()).await.unwrap();
    assert!(out.resource_outputs.is_none());
}

#[test]
fn test_input_round_trips_as_json() {
    let raw = serde_json::to_value(input()).unwrap();
    assert_eq!(raw["resource_uid"], json!("bucket.default#web.files"));
    assert_eq!(raw["resource_id"], json!("web.files"));
    let back: Input = serde_json::from_value(raw).unwrap();
    assert_eq!(back, input());
}

#[tokio::test]
async fn test_unknown_output_field_is_rejected() {
    let p = shell(r#"cat > /dev/null; echo '{"resource_outputs": {}, "surprise": 1}'"#);
    let err = p
        .provision(&CancellationToken::new(), &input())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandOutput(_)));
    assert!(err.to_string().contains("surprise"), "{err}");
}

#[tokio::test]
async fn test_invalid_output_is_rejected() {
    let p = shell("cat > /dev/null; echo 'not json'");
    let err = p
        .provision(&CancellationToken::new(), &input())
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .starts_with("failed to decode output from cmd provisioner"),
        "{err}"
    );
}

#[tokio::test]
async fn test_oversized_output_is_rejected() {
    let p = shell(&format!(
        "cat > /dev/null; head -c {} /dev/zero",
        MAX_COMMAND_OUTPUT_SIZE + 100
    ));
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        p.provision(&CancellationToken::new(), &input()),
    )
    .await
    .expect("provision did not stop reading at the limit");
    let err = result.unwrap_err();
    assert!(matches!(err, Error::CommandOutput(_)));
    assert!(err.to_string().contains("exceeds limit"), "{err}");
}

#[tokio::test]
async fn test_non_zero_exit_fails() {
    let p = shell("cat > /dev/null; exit 3");
    let err = p
        .provision(&CancellationToken::new(), &input())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }));
    assert!(err.to_string().contains("exit status: 3"), "{err}");
}

#[tokio::test]
async fn test_missing_executable_fails() {
    let entry = json!({"uri": "cmd:///definitely/not/here", "type": "bucket"});
    let p = CommandProvisioner::parse(serde_yaml::to_value(entry).unwrap()).unwrap();
    let err = p
        .provision(&CancellationToken::new(), &input())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }));
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_cancellation_stops_waiting() {
    let p = shell("sleep 30");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(10), p.provision(&cancel, &input()))
        .await
        .expect("provision did not observe cancellation");
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_already_cancelled() {
    let p = shell("sleep 30");
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        p.provision(&cancel, &input()).await,
        Err(Error::Cancelled)
    ));
}

#[test]
fn test_output_value_shape() {
    let raw: Value = json!({"resource_outputs": null});
    let decoded: magikcompose::ProvisionOutput = serde_json::from_value(raw).unwrap();
    assert!(decoded.resource_outputs.is_none());
}
