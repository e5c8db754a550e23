mod demo;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cadence_core::config::{default_config_path, EngineConfig};
use cadence_core::types::{RunStatus, SessionId, SessionRecord, WorkflowExecutionInput};
use cadence_memory::open_storage;

#[derive(Parser)]
#[command(name = "cadence", version, about = "Step-based workflow execution engine")]
struct Cli {
    /// Path to config file (defaults to ~/.cadence/config.toml)
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bundled demo workflow, streaming its events
    Demo {
        /// The brief to send through the pipeline
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
        /// Publishing channel the router picks (blog, newsletter)
        #[arg(long, default_value = "blog")]
        channel: String,
        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Inspect stored workflow sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, most recently updated first
    List {
        /// Only sessions of this workflow id
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Print a session record as JSON
    Show {
        /// Session ID
        id: String,
    },
    /// Give a session a human-readable name
    Rename {
        /// Session ID
        id: String,
        /// New name
        name: String,
    },
    /// Delete a session and its run history
    Delete {
        /// Session ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "cadence", &mut std::io::stdout());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(&default_config_path())?,
    };

    // Initialize tracing; RUST_LOG wins over the configured filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Completions { .. } => {}
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Demo {
            message,
            channel,
            session,
        } => run_demo(&config, message.join(" "), channel, session).await?,
        Commands::Sessions { action } => handle_sessions(&config, action).await?,
    }

    Ok(())
}

async fn run_demo(
    config: &EngineConfig,
    message: String,
    channel: String,
    session: Option<String>,
) -> anyhow::Result<()> {
    let storage = open_storage(&config.storage)?;
    let mut workflow = demo::build().with_config(config).with_storage(storage);
    if let Some(id) = session {
        workflow = workflow.with_session_id(SessionId::from_str(&id));
    }

    let message = if message.trim().is_empty() {
        "workflow engines in Rust".to_string()
    } else {
        message
    };
    info!(session_id = %workflow.session_id(), "Starting demo workflow");

    let input = WorkflowExecutionInput::new(message).with_data("channel", channel.into());
    let run = demo::stream_to_terminal(&workflow, input).await?;

    eprintln!(
        "\n[{} in {} steps, session {}]",
        status_label(run.status),
        run.metrics.total_steps,
        run.session_id
    );
    eprintln!("{}", serde_json::to_string_pretty(&run.metrics)?);

    if let Some(failure) = &run.failure {
        anyhow::bail!("step '{}' failed: {}", failure.step_name, failure.message);
    }
    Ok(())
}

async fn handle_sessions(config: &EngineConfig, action: SessionAction) -> anyhow::Result<()> {
    let storage = open_storage(&config.storage)?;

    match action {
        SessionAction::List { workflow } => {
            let sessions = storage.list_sessions(workflow.as_deref()).await?;
            if sessions.is_empty() {
                println!("No sessions stored.");
                return Ok(());
            }
            for record in &sessions {
                println!("{}", session_line(record));
            }
        }
        SessionAction::Show { id } => match storage.read(&SessionId::from_str(&id)).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => anyhow::bail!("no session with id {}", id),
        },
        SessionAction::Rename { id, name } => {
            if storage.rename_session(&SessionId::from_str(&id), &name).await? {
                println!("Renamed {} to \"{}\"", id, name);
            } else {
                anyhow::bail!("no session with id {}", id);
            }
        }
        SessionAction::Delete { id } => {
            if storage.delete(&SessionId::from_str(&id)).await? {
                println!("Deleted {}", id);
            } else {
                warn!(session_id = %id, "Session not found");
            }
        }
    }
    Ok(())
}

fn session_line(record: &SessionRecord) -> String {
    let last = record
        .runs
        .last()
        .map(|r| status_label(r.status))
        .unwrap_or("-");
    format!(
        "{}  {:<20}  {:<24}  runs={:<3} last={:<9}  {}",
        record.session_id,
        record.session_name.as_deref().unwrap_or("-"),
        record.workflow_name,
        record.runs.len(),
        last,
        record.updated_at.format("%Y-%m-%d %H:%M"),
    )
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Cancelled => "cancelled",
        RunStatus::Error => "error",
    }
}
