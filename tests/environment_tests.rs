//! Tests for the builtin environment provisioner and its per-resource
//! fallbacks.

use magikcompose::{
    ComposeProject, DeferredResolver, EnvironmentProvisioner, Error, ImmediateResolver, Input,
    Map, Provisioner, ProvisionerRegistry, ResourceDecl, ResourceUid, State, Workload,
    provision_resources, substitute_string,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn map(value: Value) -> Map {
    match value {
        Value::Object(m) => m,
        other => panic!("not a map: {other}"),
    }
}

fn input(uid: &str) -> Input {
    let uid = ResourceUid::from(uid);
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

fn fake_env(name: &str) -> Option<String> {
    match name {
        "DB_HOST" => Some("db.internal".to_string()),
        "LOG_LEVEL" => Some("debug".to_string()),
        _ => None,
    }
}

// =============================================================================
// Matching Tests
// =============================================================================

#[test]
fn test_matches_workload_scoped_environment_only() {
    let p = EnvironmentProvisioner::new();
    assert!(p.matches(&ResourceUid::from("environment.default#web.env")));
    assert!(!p.matches(&ResourceUid::from("environment.default#shared")));
    assert!(!p.matches(&ResourceUid::from("environment.other#web.env")));
    assert!(!p.matches(&ResourceUid::from("postgres.default#web.env")));
    assert_eq!(p.uri(), "builtin://environment");
}

// =============================================================================
// Provisioning Tests
// =============================================================================

#[tokio::test]
async fn test_params_are_rejected() {
    let p = EnvironmentProvisioner::new();
    let mut inp = input("environment.default#web.env");
    inp.resource_params = map(json!({"x": 1}));
    let err = p
        .provision(&CancellationToken::new(), &inp)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid input: no params expected");
}

#[tokio::test]
async fn test_lookups_defer_and_are_recorded() {
    let p = EnvironmentProvisioner::with_lookup(fake_env);
    let out = p
        .provision(&CancellationToken::new(), &input("environment.default#web.env"))
        .await
        .unwrap();
    let lookup = out.output_lookup_fn.unwrap();

    let err = lookup(&["LOG_LEVEL".to_string()]).unwrap_err();
    assert!(matches!(
        err,
        Error::DeferredVariable { ref variable, required: false } if variable == "LOG_LEVEL"
    ));
    assert!(lookup(&["UNSET_VAR".to_string()]).is_err());
    assert!(matches!(
        lookup(&["A".to_string(), "B".to_string()]),
        Err(Error::Lookup(_))
    ));

    let accessed = p.accessed();
    assert_eq!(accessed.len(), 2);
    assert_eq!(accessed["LOG_LEVEL"], "debug");
    assert_eq!(accessed["UNSET_VAR"], "");
}

#[tokio::test]
async fn test_params_resolve_immediately_from_process_environment() {
    let state = {
        let workload = Workload {
            metadata: map(json!({"name": "web"})),
            resources: [
                ("env".to_string(), ResourceDecl::new("environment")),
                (
                    "app".to_string(),
                    ResourceDecl::new("app").with_params(map(json!({"level": "${resources.env.PATH}"}))),
                ),
            ]
            .into(),
            ..Default::default()
        };
        State::new("demo", "/mounts")
            .with_workload(workload, None, BTreeMap::new())
            .unwrap()
            .with_primed_resources()
            .unwrap()
    };

    let seen = Arc::new(std::sync::Mutex::new(Map::new()));
    let recorder = Arc::clone(&seen);
    let environment = Arc::new(EnvironmentProvisioner::with_lookup(fake_env));
    let mut registry = ProvisionerRegistry::new();
    registry.push(environment.clone());
    registry.push(Arc::new(magikcompose::EphemeralProvisioner::new(
        "test://app",
        ResourceUid::from("app.default#web.app"),
        move |input| {
            *recorder.lock().unwrap() = input.resource_params.clone();
            Ok(Default::default())
        },
    )));

    provision_resources(
        &state,
        &registry,
        &mut ComposeProject::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let path = std::env::var("PATH").unwrap();
    assert_eq!(*seen.lock().unwrap(), map(json!({"level": path})));
    assert_eq!(environment.accessed()["PATH"], "");
}

// =============================================================================
// Fallback Tests
// =============================================================================

#[tokio::test]
async fn test_fallback_variables_are_required() {
    let env = EnvironmentProvisioner::with_lookup(fake_env);
    let uid = ResourceUid::from("postgres.default#web.db");
    let fallback = env.fallback_for("db", uid.clone());

    assert!(fallback.matches(&uid));
    assert!(!fallback.matches(&ResourceUid::from("postgres.default#web.other")));
    assert!(fallback.uri().starts_with("builtin://environment/"));
    assert!(!fallback.uri().contains('#'));
    assert_eq!(
        fallback.variable_name(&["conn-string".to_string()]),
        "DB_CONN_STRING"
    );

    let out = fallback
        .provision(&CancellationToken::new(), &input(uid.as_str()))
        .await
        .unwrap();
    let lookup = out.output_lookup_fn.unwrap();
    assert!(matches!(
        lookup(&["host".to_string()]),
        Err(Error::DeferredVariable { ref variable, required: true }) if variable == "DB_HOST"
    ));
    assert!(matches!(lookup(&[]), Err(Error::Lookup(_))));
    assert_eq!(env.accessed()["DB_HOST"], "db.internal");
}

#[tokio::test]
async fn test_fallback_renders_deferred_expression() {
    let env = EnvironmentProvisioner::with_lookup(fake_env);
    let fallback = env.fallback_for("db", ResourceUid::from("postgres.default#web.db"));
    let out = fallback
        .provision(&CancellationToken::new(), &input("postgres.default#web.db"))
        .await
        .unwrap();

    let resources = [("db".to_string(), out.output_lookup_fn.unwrap())].into();
    let inner = magikcompose::build_substitution_function(Map::new(), resources);

    let deferred = DeferredResolver::new(&inner);
    let resolve = |r: &str| deferred.resolve(r);
    assert_eq!(
        substitute_string("postgres://${resources.db.host}:5432", &resolve).unwrap(),
        "postgres://${DB_HOST?required}:5432"
    );
    assert_eq!(deferred.deferred_variables()["DB_HOST"], true);

    let immediate = ImmediateResolver::new(&inner).with_env_lookup(|_| None);
    let resolve = |r: &str| immediate.resolve(r);
    let err = substitute_string("${resources.db.user}", &resolve).unwrap_err();
    assert!(matches!(err, Error::UnresolvedVariable { required: true, .. }));
}
