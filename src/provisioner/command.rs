//! Command provisioner.
//!
//! Runs an external executable per resource. The provisioning [`Input`] is
//! written to its stdin as JSON and a [`ProvisionOutput`] is read back from
//! stdout. Stderr is passed through to ours.
//!
//! # Binary Resolution
//!
//! The uri host names the executable:
//!
//! | Uri                     | Executable                         |
//! |-------------------------|------------------------------------|
//! | `cmd:///abs/path`       | `/abs/path`                        |
//! | `cmd://./rel/path`      | `<cwd>/rel/path`                   |
//! | `cmd://../rel/path`     | `<parent of cwd>/rel/path`         |
//! | `cmd://~/rel/path`      | `<home>/rel/path`                  |
//! | `cmd://python`          | `python` looked up on `PATH`       |
//!
//! # Cancellation
//!
//! The child is spawned with `kill_on_drop`, so abandoning the wait when the
//! cancellation token fires terminates it.

use super::{Input, ProvisionOutput, Provisioner, ProvisionerDescriptor};
use crate::constants::MAX_COMMAND_OUTPUT_SIZE;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Provisioner file entry of a `cmd://` provisioner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CommandSource {
    uri: String,
    #[serde(rename = "type")]
    resource_type: String,
    class: Option<String>,
    id: Option<String>,
    description: String,
    args: Vec<String>,
    #[serde(alias = "supported_params")]
    params: Vec<String>,
    #[serde(alias = "expected_outputs")]
    outputs: Vec<String>,
}

/// Provisions resources by running an external command.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    descriptor: ProvisionerDescriptor,
    args: Vec<String>,
}

impl CommandProvisioner {
    /// Parses one provisioner file entry. Unknown fields are rejected.
    ///
    /// # Errors
    ///
    /// - `uri` or `type` missing
    /// - The uri carries user info, query params or a port
    /// - A `PATH` command name is followed by further path segments
    pub fn parse(entry: serde_yaml::Value) -> Result<Self> {
        let source: CommandSource = serde_yaml::from_value(entry)?;
        if source.uri.is_empty() {
            return Err(Error::InvalidInput("uri not set".to_string()));
        }
        if source.resource_type.is_empty() {
            return Err(Error::InvalidInput("type not set".to_string()));
        }
        validate_uri(&source.uri)?;

        Ok(Self {
            descriptor: ProvisionerDescriptor {
                uri: source.uri,
                resource_type: source.resource_type,
                class: source.class,
                id: source.id,
                description: source.description,
                supported_params: source.params,
                expected_outputs: source.outputs,
            },
            args: source.args,
        })
    }

    /// Arguments passed to the executable.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    fn descriptor(&self) -> &ProvisionerDescriptor {
        &self.descriptor
    }

    async fn provision(&self, cancel: &CancellationToken, input: &Input) -> Result<ProvisionOutput> {
        let bin = decode_binary(&self.descriptor.uri)?;
        let command = bin.display().to_string();
        let failed = |reason: String| Error::CommandFailed {
            command: command.clone(),
            reason,
        };

        let raw_input = serde_json::to_vec(input)?;

        debug!(
            "Executing '{} {:?}' for command provisioner",
            command, self.args
        );
        let mut child = Command::new(&bin)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("child stdin was not piped".to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&raw_input).await {
                debug!("Command provisioner did not read all input: {}", e);
            }
        });

        let (status, stdout) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            output = collect_output(&mut child) => output.map_err(|e| failed(e.to_string()))?,
        };

        // Still running, killed when `child` drops.
        let Some(status) = status else {
            return Err(Error::CommandOutput(format!(
                "output exceeds limit of {MAX_COMMAND_OUTPUT_SIZE} bytes"
            )));
        };
        if !status.success() {
            return Err(failed(status.to_string()));
        }

        serde_json::from_slice(&stdout).map_err(|e| {
            debug!(
                "Output from command provisioner:\n{}",
                String::from_utf8_lossy(&stdout)
            );
            Error::CommandOutput(e.to_string())
        })
    }
}

/// Reads stdout up to [`MAX_COMMAND_OUTPUT_SIZE`], then waits for the child.
///
/// The status is `None` when the child wrote more than that.
async fn collect_output(child: &mut Child) -> std::io::Result<(Option<ExitStatus>, Vec<u8>)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;

    let mut raw = Vec::new();
    stdout
        .take(MAX_COMMAND_OUTPUT_SIZE as u64 + 1)
        .read_to_end(&mut raw)
        .await?;
    if raw.len() > MAX_COMMAND_OUTPUT_SIZE {
        return Ok((None, raw));
    }

    let status = child.wait().await?;
    Ok((Some(status), raw))
}

// =============================================================================
// Uri Handling
// =============================================================================

fn invalid_uri(uri: &str, reason: impl Into<String>) -> Error {
    Error::InvalidProvisionerUri {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| invalid_uri(uri, format!("failed to parse url: {e}")))
}

/// Splits the uri path into its non-empty segments.
fn path_segments(url: &Url) -> Vec<&str> {
    url.path().split('/').filter(|p| !p.is_empty()).collect()
}

/// Any path after the host, a bare trailing `/` included.
fn has_path_parts(url: &Url) -> bool {
    !url.path().is_empty()
}

fn is_relative_host(host: &str) -> bool {
    matches!(host, "" | "~" | "." | "..")
}

fn validate_uri(uri: &str) -> Result<()> {
    let url = parse_uri(uri)?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid_uri(uri, "cmd provisioner uri cannot contain user info"));
    }
    if url.query().is_some_and(|q| !q.is_empty()) {
        return Err(invalid_uri(uri, "cmd provisioner uri cannot contain query params"));
    }
    if url.port().is_some() {
        return Err(invalid_uri(uri, "cmd provisioner uri cannot contain a port"));
    }
    let host = url.host_str().unwrap_or_default();
    if !is_relative_host(host) && has_path_parts(&url) {
        return Err(invalid_uri(
            uri,
            "direct command reference cannot contain additional path parts",
        ));
    }
    Ok(())
}

/// Resolves the executable a `cmd://` uri refers to.
fn decode_binary(uri: &str) -> Result<PathBuf> {
    let url = parse_uri(uri)?;
    let host = url.host_str().unwrap_or_default();
    let segments = path_segments(&url);

    let base = match host {
        "" => PathBuf::from("/"),
        "~" => dirs::home_dir()
            .ok_or_else(|| invalid_uri(uri, "failed to resolve user home directory"))?,
        "." => std::env::current_dir()?,
        ".." => {
            let cwd = std::env::current_dir()?;
            cwd.parent().map_or_else(|| cwd.clone(), Path::to_path_buf)
        }
        name => {
            if has_path_parts(&url) {
                return Err(invalid_uri(
                    uri,
                    "direct command reference cannot contain additional path parts",
                ));
            }
            return which::which(name)
                .map_err(|e| invalid_uri(uri, format!("failed to find '{name}' on path: {e}")));
        }
    };
    Ok(segments.iter().fold(base, |path, segment| path.join(segment)))
}
