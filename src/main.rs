use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;
use worksession::configuration::config::Config;
use worksession::controller::Controller;
use worksession::error_handling::types::ControllerError;
use worksession::monitor::MonitorEvent;
use worksession::session_management::SessionStatus;
use worksession::termination::TerminationReason;

#[derive(Parser)]
#[command(name = "worksession")]
#[command(version = "0.1.0")]
#[command(about = "Tracks work sessions and switches between them as you move across projects")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "WORKSESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Session database, overrides `database.path`; `:memory:` for a scratch store
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the working directory and switch sessions as it changes
    Watch,
    /// Show what a switch to PATH would do
    Evaluate {
        #[arg(long)]
        path: String,
    },
    /// Switch to the session for PATH
    Switch {
        #[arg(long)]
        path: String,
        #[arg(long)]
        force_create: bool,
    },
    /// Terminate a session
    Terminate {
        id: Uuid,
        #[arg(long, default_value = "user_requested")]
        reason: String,
        #[arg(long)]
        force: bool,
    },
    /// List stored sessions
    Sessions {
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }),
        None => Config::default(),
    };
    if let Some(database) = args.database {
        config.database.path = database;
    }
    info!("Configuration imported successfully");

    let controller = Controller::new(config).await.unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    let outcome = match args.command {
        Command::Watch => watch(&controller).await,
        Command::Evaluate { path } => controller
            .evaluate(&path)
            .await
            .map(|evaluation| print_json(&evaluation)),
        Command::Switch { path, force_create } => controller
            .switch(&path, force_create)
            .await
            .map(|result| print_json(&result)),
        Command::Terminate { id, reason, force } => {
            let Some(reason) = TerminationReason::parse(&reason) else {
                error!("Unknown termination reason: {}", reason);
                std::process::exit(2);
            };
            let result = controller.terminate(id, reason, force).await;
            print_json(&result);
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Sessions { status } => {
            let status = match status.as_deref().map(SessionStatus::parse) {
                None => None,
                Some(Some(status)) => Some(status),
                Some(None) => {
                    error!("Unknown session status: {}", status.unwrap_or_default());
                    std::process::exit(2);
                }
            };
            controller.sessions(status).await.map(|sessions| {
                for s in sessions {
                    println!(
                        "{}  {:<10} {:<20} {}",
                        s.id,
                        s.status.as_str(),
                        s.project_name,
                        s.project_path
                    );
                }
            })
        }
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Unable to render output: {}", e),
    }
}

/// Runs the monitor until Ctrl-C. A prompt is approved by answering `y` on
/// stdin; any other answer declines it.
async fn watch(controller: &Controller) -> Result<(), ControllerError> {
    let (tx, mut events) = mpsc::channel(64);
    let monitor = controller.monitor(tx);
    monitor.start();
    info!("Watching for project changes, press Ctrl-C to stop");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut waiting: Option<Uuid> = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping monitor");
                break;
            }
            Some(event) = events.recv() => match event {
                MonitorEvent::PathChanged { new, .. } => info!("Location changed to {}", new),
                MonitorEvent::SwitchSuggested { context, evaluation } => info!(
                    "Suggested: {:?} for {} (confidence {:.2})",
                    evaluation.decision, context.project_path, evaluation.confidence
                ),
                MonitorEvent::PromptRequired(prompt) => {
                    println!(
                        "Switch to {} ({:?})? [y/N]",
                        prompt.context.project_path, prompt.evaluation.decision
                    );
                    waiting = Some(prompt.id);
                }
                MonitorEvent::PromptExpired { id } => {
                    if waiting == Some(id) {
                        waiting = None;
                    }
                    info!("Prompt {} expired", id);
                }
                MonitorEvent::SwitchCompleted(event) => info!(
                    "Switched to {} ({:?})",
                    event.new_path, event.result.decision
                ),
                MonitorEvent::SwitchFailed { path, error } => {
                    warn!("Switch to {} failed: {}", path, error)
                }
            },
            line = stdin.next_line(), if stdin_open => {
                let Ok(Some(line)) = line else {
                    stdin_open = false;
                    continue;
                };
                if let Some(id) = waiting.take() {
                    let approved = line.trim().eq_ignore_ascii_case("y");
                    if let Err(e) = monitor.respond_to_prompt(id, approved).await {
                        warn!("{}", e);
                    }
                }
            }
        }
    }

    monitor.stop();
    Ok(())
}
