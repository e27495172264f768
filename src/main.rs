use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use loom_core::ids::{ProjectId, SessionId};
use loom_core::transcript::InMemoryTranscript;
use loom_engine::bus::EventBus;
use loom_engine::permissions::PermissionGate;
use loom_engine::process::{BashOutcome, BashRequest, ProcessSupervisor, SupervisorConfig};
use loom_engine::scripted::{ScriptedProvider, ScriptedResponse};
use loom_engine::tools::create_default_registry;
use loom_engine::{CoordinatorConfig, CoordinatorDeps, ExecutionCoordinator};
use loom_settings::LoomSettings;
use loom_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "loom", about = "Tool-calling execution engine")]
struct Cli {
    /// Root that shell commands must stay inside (default: settings, then cwd).
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Settings file (default: ~/.loom/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one turn, replaying canned completions. With no responses the
    /// provider fails and the fallback reply is used.
    Run {
        /// File holding one completion; repeat for later calls.
        #[arg(long = "response")]
        responses: Vec<PathBuf>,
        message: String,
    },
    /// Run a shell command through the process supervisor.
    Exec {
        #[arg(long)]
        background: bool,
        /// Timeout in milliseconds.
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        cwd: Option<PathBuf>,
        command: String,
    },
}

fn supervisor_config(settings: &LoomSettings) -> SupervisorConfig {
    let bash = &settings.bash;
    SupervisorConfig {
        shell: bash.shell.clone(),
        default_timeout: bash.default_timeout(),
        max_timeout: bash.max_timeout(),
        max_output_bytes: bash.max_output_bytes,
        output_poll_timeout: bash.output_poll_timeout(),
        finished_retention: bash.finished_retention,
        kill_grace: bash.kill_grace(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => loom_settings::load_settings_from_path(path),
        None => loom_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let logging = &settings.logging;
    let _telemetry = init_telemetry(TelemetryConfig::from_names(
        &logging.level,
        logging.modules.iter().map(|(m, l)| (m.as_str(), l.as_str())),
        logging.json,
    ))?;

    let project_root = match cli.project_root {
        Some(root) => root,
        None => settings
            .project
            .root_or(std::env::current_dir().context("failed to read current directory")?),
    };
    tracing::info!(project_root = %project_root.display(), "loom starting");

    let supervisor = Arc::new(ProcessSupervisor::new(supervisor_config(&settings)));
    let cancel = CancellationToken::new();

    let work = async {
        match cli.command {
            Command::Run { responses, message } => {
                run_turn(&settings, &project_root, &supervisor, responses, &message, &cancel).await
            }
            Command::Exec { background, timeout, cwd, command } => {
                let mut request = BashRequest::new(command);
                request.working_directory = cwd;
                request.timeout = timeout.map(Duration::from_millis);
                request.run_in_background = background;
                exec(&supervisor, &project_root, request, &cancel).await
            }
        }
    };

    let result = until_interrupted(work, tokio::signal::ctrl_c(), &cancel).await;

    let reaped = supervisor.cleanup();
    tracing::info!(reaped, "shutting down");
    result
}

/// Drive `work` to completion. If `interrupt` fires first, cancel `cancel` and
/// keep driving `work` so a running command can observe it and kill its group.
async fn until_interrupted<W, I>(work: W, interrupt: I, cancel: &CancellationToken) -> W::Output
where
    W: Future,
    I: Future,
{
    tokio::pin!(work);
    tokio::select! {
        biased;
        output = &mut work => output,
        _ = interrupt => {
            tracing::warn!("interrupted, cancelling");
            cancel.cancel();
            work.await
        }
    }
}

async fn run_turn(
    settings: &LoomSettings,
    project_root: &Path,
    supervisor: &Arc<ProcessSupervisor>,
    response_files: Vec<PathBuf>,
    message: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut responses = Vec::with_capacity(response_files.len());
    for path in &response_files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read response file {}", path.display()))?;
        responses.push(ScriptedResponse::text(text));
    }

    let events = Arc::new(EventBus::new());
    let deps = CoordinatorDeps {
        provider: Arc::new(ScriptedProvider::new(responses)),
        registry: Arc::new(create_default_registry(Arc::clone(supervisor))),
        permissions: Arc::new(PermissionGate::with_rules(settings.permissions.clone())),
        transcript: Arc::new(InMemoryTranscript::new()),
        events: Arc::clone(&events),
        project_root: project_root.to_path_buf(),
        confirmer: None,
    };
    let config = CoordinatorConfig {
        system_prompt: settings.coordinator.system_prompt.clone(),
        preview_chars: settings.coordinator.preview_chars,
    };
    let coordinator = ExecutionCoordinator::new(SessionId::new(), ProjectId::new(), deps, config);

    let mut subscription = coordinator.subscribe();
    let subscription_id = subscription.id();
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            }
        }
    });

    let turn = coordinator.handle_message(message);
    tokio::pin!(turn);
    let outcome = tokio::select! {
        biased;
        outcome = &mut turn => outcome,
        _ = cancel.cancelled() => {
            coordinator.abort();
            turn.await
        }
    };
    events.unsubscribe(subscription_id);
    printer.await.context("event printer failed")?;

    let report = outcome?;
    tracing::info!(status = report.status.as_str(), fallback = report.fallback, "turn done");
    Ok(())
}

async fn exec(
    supervisor: &ProcessSupervisor,
    project_root: &Path,
    request: BashRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    match supervisor.bash(project_root, request, cancel).await? {
        BashOutcome::Foreground(output) => {
            println!("{}", serde_json::to_string(&output)?);
        }
        BashOutcome::Background(started) => {
            println!("{}", serde_json::to_string(&started)?);
            loop {
                let output = supervisor.output(&started.shell_id, None, cancel).await?;
                if output.completed {
                    println!("{}", serde_json::to_string(&output)?);
                    break;
                }
            }
        }
    }
    Ok(())
}
