//! Template provisioner.
//!
//! A template provisioner is a fixed pipeline of named Handlebars templates.
//! Each stage renders to YAML, which is decoded into the stage's shape:
//!
//! ```text
//! init ──► state ──► shared ──► outputs, directories, files,
//!  │         │         │        networks, services, volumes, info_logs
//!  ▼         ▼         ▼
//! Init     State     Shared (patched in place)
//! ```
//!
//! Later stages see the results of earlier ones: `{{Init.x}}`, `{{State.x}}`
//! and the already patched `{{Shared.x}}`. A blank template, or a template
//! that renders to blank output, produces nothing for its stage.
//!
//! # Template Data
//!
//! `Uid`, `Type`, `Class`, `Id`, `Params`, `Metadata`, `Init`, `State`,
//! `Shared`, `SourceWorkload`, `WorkloadServices`, `ComposeProjectName`,
//! `MountsDirectory`.
//!
//! # Helpers
//!
//! `upper`, `lower`, `trim`, `quote`, `toJson`, `default FALLBACK VALUE`,
//! `dig KEY... DEFAULT MAP`, `randAlphaNum N`, `randAlpha N`. Random helpers
//! are meant to be guarded so their result is generated once and then read
//! back from `State`:
//!
//! ```yaml
//! state: |
//!   password: {{default (randAlphaNum 16) State.password}}
//! ```

use super::{Input, ProvisionOutput, Provisioner, ProvisionerDescriptor};
use crate::error::{Error, Result};
use crate::patch::{Map, patch_map};
use async_trait::async_trait;
use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, handlebars_helper,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Provisioner file entry of a `template://` provisioner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TemplateSource {
    uri: String,
    #[serde(rename = "type")]
    resource_type: String,
    class: Option<String>,
    id: Option<String>,
    description: String,
    supported_params: Vec<String>,
    expected_outputs: Vec<String>,

    init: String,
    state: String,
    shared: String,
    outputs: String,
    directories: String,
    files: String,
    networks: String,
    volumes: String,
    services: String,
    info_logs: String,
}

/// Provisions resources by evaluating a sequence of templates.
pub struct TemplateProvisioner {
    descriptor: ProvisionerDescriptor,
    source: TemplateSource,
    registry: Handlebars<'static>,
}

impl TemplateProvisioner {
    /// Parses one provisioner file entry. Unknown fields are rejected.
    pub fn parse(entry: serde_yaml::Value) -> Result<Self> {
        let source: TemplateSource = serde_yaml::from_value(entry)?;
        if source.uri.is_empty() {
            return Err(Error::InvalidInput("uri not set".to_string()));
        }
        if source.resource_type.is_empty() {
            return Err(Error::InvalidInput("type not set".to_string()));
        }

        let descriptor = ProvisionerDescriptor {
            uri: source.uri.clone(),
            resource_type: source.resource_type.clone(),
            class: source.class.clone(),
            id: source.id.clone(),
            description: source.description.clone(),
            supported_params: source.supported_params.clone(),
            expected_outputs: source.expected_outputs.clone(),
        };
        Ok(Self {
            descriptor,
            source,
            registry: new_registry(),
        })
    }

    /// Renders one stage and decodes its YAML output.
    fn render_stage<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        template: &str,
        data: &Value,
    ) -> Result<Option<T>> {
        let template = template.trim();
        if template.is_empty() {
            return Ok(None);
        }

        let rendered = self
            .registry
            .render_template(template, data)
            .map_err(|e| Error::TemplateStage {
                stage,
                reason: format!("failed to render template: {e}"),
            })?;
        if rendered.trim().is_empty() {
            return Ok(None);
        }

        serde_yaml::from_str(&rendered).map(Some).map_err(|e| {
            debug!("{} template output was '{}'", stage, rendered);
            Error::TemplateStage {
                stage,
                reason: format!("failed to decode output: {e}"),
            }
        })
    }
}

#[async_trait]
impl Provisioner for TemplateProvisioner {
    fn descriptor(&self) -> &ProvisionerDescriptor {
        &self.descriptor
    }

    async fn provision(&self, _cancel: &CancellationToken, input: &Input) -> Result<ProvisionOutput> {
        let mut data = json!({
            "Uid": input.resource_uid.as_str(),
            "Type": input.resource_type,
            "Class": input.resource_class,
            "Id": input.resource_id,
            "Params": input.resource_params,
            "Metadata": input.resource_metadata,
            "Init": {},
            "State": input.resource_state,
            "Shared": input.shared_state,
            "SourceWorkload": input.source_workload,
            "WorkloadServices": serde_json::to_value(&input.workload_services)?,
            "ComposeProjectName": input.compose_project_name,
            "MountsDirectory": input.mount_directory_path.display().to_string(),
        });
        let src = &self.source;

        let init: Map = self.render_stage("init", &src.init, &data)?.unwrap_or_default();
        data["Init"] = Value::Object(init);

        let state: Map = self.render_stage("state", &src.state, &data)?.unwrap_or_default();
        data["State"] = Value::Object(state.clone());

        let shared: Map = self.render_stage("shared", &src.shared, &data)?.unwrap_or_default();
        data["Shared"] = Value::Object(patch_map(&input.shared_state, &shared));

        let outputs: Map = self.render_stage("outputs", &src.outputs, &data)?.unwrap_or_default();
        let directories = self
            .render_stage("directories", &src.directories, &data)?
            .unwrap_or_default();
        let files = self.render_stage("files", &src.files, &data)?.unwrap_or_default();
        let networks = self.render_stage("networks", &src.networks, &data)?.unwrap_or_default();
        let services = self.render_stage("services", &src.services, &data)?.unwrap_or_default();
        let volumes = self.render_stage("volumes", &src.volumes, &data)?.unwrap_or_default();
        let info_logs: Vec<String> = self
            .render_stage("info logs", &src.info_logs, &data)?
            .unwrap_or_default();

        for line in info_logs {
            info!("{}: {}", input.resource_uid, line);
        }

        Ok(ProvisionOutput {
            resource_state: Some(state),
            resource_outputs: Some(outputs),
            shared_state: Some(shared),
            relative_directories: directories,
            relative_file_contents: files,
            compose_networks: networks,
            compose_volumes: volumes,
            compose_services: services,
            ..Default::default()
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(trim: |s: str| s.trim().to_string());
handlebars_helper!(quote: |v: Json| Value::String(render_plain(v)).to_string());
handlebars_helper!(to_json: |v: Json| serde_json::to_string(v).unwrap_or_default());
handlebars_helper!(default_value: |fallback: Json, value: Json| {
    if is_empty_value(value) { fallback.clone() } else { value.clone() }
});
/// Longest string the random helpers generate.
const MAX_RANDOM_LENGTH: u64 = 4096;

fn random_length(h: &Helper) -> std::result::Result<usize, RenderError> {
    let n = h
        .param(0)
        .and_then(|p| p.value().as_u64())
        .ok_or_else(|| RenderErrorReason::Other(format!("{} requires a length", h.name())))?;
    if n > MAX_RANDOM_LENGTH {
        return Err(RenderErrorReason::Other(format!(
            "{}: length {n} exceeds limit of {MAX_RANDOM_LENGTH}",
            h.name()
        ))
        .into());
    }
    Ok(n as usize)
}

fn rand_alpha_num(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let n = random_length(h)?;
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect();
    out.write(&value)?;
    Ok(())
}

fn rand_alpha(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let n = random_length(h)?;
    let mut rng = rand::thread_rng();
    let value: String = (0..n)
        .map(|_| char::from(LETTERS[rng.gen_range(0..LETTERS.len())]))
        .collect();
    out.write(&value)?;
    Ok(())
}

/// `dig KEY... DEFAULT MAP`: walks MAP by keys, DEFAULT when any key is
/// missing.
fn dig_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let params = h.params();
    if params.len() < 3 {
        return Err(RenderErrorReason::Other(
            "dig requires at least one key, a default and a map".to_string(),
        )
        .into());
    }
    let (keys, rest) = params.split_at(params.len() - 2);
    let fallback = rest[0].value();
    let mut current = Some(rest[1].value());
    for key in keys {
        let key = render_plain(key.value());
        current = current.and_then(|v| v.as_object()).and_then(|m| m.get(&key));
    }
    let found = match current {
        Some(v) if !v.is_null() => v,
        _ => fallback,
    };
    out.write(&render_plain(found))?;
    Ok(())
}

fn render_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

fn new_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("trim", Box::new(trim));
    registry.register_helper("quote", Box::new(quote));
    registry.register_helper("toJson", Box::new(to_json));
    registry.register_helper("default", Box::new(default_value));
    registry.register_helper("dig", Box::new(dig_helper));
    registry.register_helper("randAlphaNum", Box::new(rand_alpha_num));
    registry.register_helper("randAlpha", Box::new(rand_alpha));
    registry
}
