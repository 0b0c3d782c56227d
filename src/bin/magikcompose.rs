//! # magikcompose - Resource Provisioning CLI
//!
//! ```text
//! magikcompose init [--project NAME]
//! magikcompose generate score.yaml... [--output compose.yaml] [--provisioners DIR]
//! magikcompose resources list [--format table|json|yaml]
//! magikcompose resources get-outputs TYPE.CLASS#ID [--format json|yaml]
//! magikcompose provisioners list [--format table|json|yaml]
//! ```
//!
//! All commands operate on the `.magikcompose` state directory in the current
//! working directory. Ctrl-C cancels an in-flight `generate`, terminating any
//! running command provisioner.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use magikcompose::{
    ComposeProject, DEFAULT_PROVISIONERS_FILE_NAME, EnvironmentProvisioner,
    PROVISIONERS_FILE_SUFFIX, ProvisionerRegistry, ResourceUid, StateDirectory, Workload,
    env_manifest, list_resources, load_provisioners_from_directory, provision_resources,
    resource_outputs, write_atomic,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_PROVISIONERS: &str = include_str!("../default.provisioners.yaml");

type CliResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "magikcompose")]
#[command(version)]
#[command(about = "Provision workload resources into a compose project")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state directory and default provisioners
    Init {
        /// Compose project name, defaults to the directory name
        #[arg(short, long)]
        project: Option<String>,

        /// Do not write the default provisioners file
        #[arg(long)]
        no_default_provisioners: bool,
    },
    /// Add workloads, provision their resources and write the compose file
    Generate {
        /// Workload files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output compose file, `-` for stdout
        #[arg(short, long, default_value = "compose.yaml")]
        output: PathBuf,

        /// Directory to load provisioner files from instead of the state directory
        #[arg(long)]
        provisioners: Option<PathBuf>,

        /// Environment manifest listing the variables resources refer to
        #[arg(long, default_value = magikcompose::ENV_MANIFEST_FILE_NAME)]
        env_file: PathBuf,
    },
    /// Inspect provisioned resources
    Resources {
        #[command(subcommand)]
        command: ResourcesCommand,
    },
    /// Inspect loaded provisioners
    Provisioners {
        #[command(subcommand)]
        command: ProvisionersCommand,
    },
}

#[derive(Subcommand)]
enum ResourcesCommand {
    /// List resource uids in provisioning order
    List {
        #[arg(short, long, value_enum, default_value = "table")]
        format: Format,
    },
    /// Print the outputs of a resource
    GetOutputs {
        /// Resource uid, TYPE.CLASS#ID
        uid: String,

        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,
    },
}

#[derive(Subcommand)]
enum ProvisionersCommand {
    /// List provisioners in precedence order
    List {
        #[arg(short, long, value_enum, default_value = "table")]
        format: Format,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("magikcompose: failed to install log subscriber");
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Init {
            project,
            no_default_provisioners,
        } => init(project, no_default_provisioners),
        Commands::Generate {
            files,
            output,
            provisioners,
            env_file,
        } => generate(&files, &output, provisioners.as_deref(), &env_file).await,
        Commands::Resources { command } => match command {
            ResourcesCommand::List { format } => resources_list(format),
            ResourcesCommand::GetOutputs { uid, format } => resources_get_outputs(&uid, format),
        },
        Commands::Provisioners {
            command: ProvisionersCommand::List { format },
        } => provisioners_list(format),
    }
}

fn load_state_directory() -> CliResult<StateDirectory> {
    StateDirectory::load(Path::new("."))?
        .ok_or_else(|| "state directory does not exist, please run \"magikcompose init\" first".into())
}

fn load_registry(dir: &Path) -> CliResult<(ProvisionerRegistry, Arc<EnvironmentProvisioner>)> {
    let mut registry = ProvisionerRegistry::new();
    let loaded = load_provisioners_from_directory(dir, PROVISIONERS_FILE_SUFFIX)?;
    if !loaded.is_empty() {
        info!("Loaded {} resource provisioners", loaded.len());
    }
    registry.extend(loaded);

    let environment = Arc::new(EnvironmentProvisioner::new());
    registry.push(environment.clone());
    Ok((registry, environment))
}

// =============================================================================
// Commands
// =============================================================================

fn init(project: Option<String>, no_default_provisioners: bool) -> CliResult<()> {
    let root = Path::new(".");
    let project = match project {
        Some(name) => name,
        None => std::env::current_dir()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string()),
    };

    let dir = StateDirectory::init(root, &project)?;
    info!(
        "Initialised state directory '{}' for project '{}'",
        dir.path().display(),
        project
    );

    if !no_default_provisioners {
        let dst = dir.path().join(DEFAULT_PROVISIONERS_FILE_NAME);
        if dst.exists() {
            info!("Default provisioners file '{}' already exists", dst.display());
        } else {
            std::fs::write(&dst, DEFAULT_PROVISIONERS)?;
            info!("Wrote default provisioners file '{}'", dst.display());
        }
    }
    Ok(())
}

async fn generate(
    files: &[PathBuf],
    output: &Path,
    provisioners_dir: Option<&Path>,
    env_file: &Path,
) -> CliResult<()> {
    let mut dir = load_state_directory()?;

    let mut state = dir.state.clone();
    for file in files {
        let raw = std::fs::read(file)
            .map_err(|e| format!("failed to read '{}': {e}", file.display()))?;
        let workload = Workload::from_yaml(&raw)
            .map_err(|e| format!("failed to load '{}': {e}", file.display()))?;
        state = state.with_workload(workload, Some(file.clone()), Default::default())?;
    }
    if state.workloads.is_empty() {
        return Err("the project is empty, please provide a workload file to generate from".into());
    }

    let (registry, environment) = load_registry(provisioners_dir.unwrap_or(dir.path()))?;
    let state = state.with_primed_resources()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling provisioning");
            on_interrupt.cancel();
        }
    });

    let mut project = ComposeProject::new(state.project_name.clone());
    let state = provision_resources(&state, &registry, &mut project, &cancel)
        .await
        .map_err(|e| format!("failed to provision: {e}"))?;

    dir.state = state;
    dir.persist()?;

    let yaml = project.to_yaml()?;
    if output == Path::new("-") {
        print!("{yaml}");
    } else {
        write_atomic(output, yaml.as_bytes())?;
        info!("Wrote compose file '{}'", output.display());
    }

    let accessed = environment.accessed();
    if !accessed.is_empty() {
        std::fs::write(env_file, env_manifest(&accessed))?;
        info!("Wrote environment manifest '{}'", env_file.display());
    }
    Ok(())
}

fn resources_list(format: Format) -> CliResult<()> {
    let dir = load_state_directory()?;
    let listing = list_resources(&dir.state)?;
    let rows: Vec<_> = listing
        .iter()
        .map(|r| json!({"uid": r.uid.as_str(), "outputs": r.outputs}))
        .collect();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(&rows)?),
        Format::Table => {
            print_table(
                &["UID", "OUTPUTS"],
                listing
                    .iter()
                    .map(|r| vec![r.uid.to_string(), r.outputs.join(", ")])
                    .collect(),
            );
        }
    }
    Ok(())
}

fn resources_get_outputs(uid: &str, format: Format) -> CliResult<()> {
    let uid: ResourceUid = uid.parse()?;
    let dir = load_state_directory()?;
    let outputs = resource_outputs(&dir.state, &uid)?;
    match format {
        Format::Yaml => print!("{}", serde_yaml::to_string(&outputs)?),
        Format::Json | Format::Table => println!("{}", serde_json::to_string_pretty(&outputs)?),
    }
    Ok(())
}

fn provisioners_list(format: Format) -> CliResult<()> {
    let dir = load_state_directory()?;
    let (registry, _) = load_registry(dir.path())?;
    let summaries = registry.describe();

    match format {
        Format::Table => print_table(
            &["TYPE", "CLASS", "PARAMS", "OUTPUTS", "DESCRIPTION"],
            summaries
                .iter()
                .map(|s| {
                    vec![
                        s.resource_type.clone(),
                        s.class.clone(),
                        s.params.join(", "),
                        s.outputs.join(", "),
                        s.description.clone(),
                    ]
                })
                .collect(),
        ),
        Format::Json | Format::Yaml => {
            let rows: Vec<_> = summaries
                .iter()
                .map(|s| {
                    json!({
                        "uri": s.uri,
                        "type": s.resource_type,
                        "class": s.class,
                        "params": s.params,
                        "outputs": s.outputs,
                        "description": s.description,
                    })
                })
                .collect();
            if format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", serde_yaml::to_string(&rows)?);
            }
        }
    }
    Ok(())
}

fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    println!("{}", table_row(&headers, &widths));
    for row in &rows {
        println!("{}", table_row(row, &widths));
    }
}

fn table_row(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}
