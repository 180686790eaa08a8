//! Tether CLI - Main entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tether_agent::Engine;
use tether_core::{Implementation, McpServer};
use tether_foundation::{ConfigLoader, TetherConfig};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tether - federates local tools and MCP servers into one tool registry
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Settings file (highest priority, must exist)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Working directory (default: current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Run a single task and exit: <tool-name> [json-args]
    #[arg(short, long)]
    prompt: Option<String>,

    /// Task timeout in seconds (overrides engine.taskTimeoutSecs)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every federated tool
    Tools {
        /// Print MCP tool definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show MCP server connection status
    Status,
    /// Invoke one tool
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        args: Option<String>,
    },
    /// Serve the federated registry as an MCP server over stdio
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // 로그는 항상 stderr (serve 모드의 stdout은 프로토콜 전용)
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let working_dir = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let config = load_config(&working_dir, args.config.as_ref())?;

    let mut engine = Engine::new(config, &working_dir);
    if let Some(secs) = args.timeout {
        engine = engine.with_task_timeout(Some(Duration::from_secs(secs)));
    }
    engine.start().await?;

    let result = run(&mut engine, args).await;

    if let Err(e) = engine.shutdown().await {
        warn!("Shutdown failed: {}", e);
    }
    result
}

fn load_config(working_dir: &std::path::Path, explicit: Option<&PathBuf>) -> anyhow::Result<TetherConfig> {
    let mut loader = ConfigLoader::new(working_dir);
    if let Some(path) = explicit {
        loader = loader.with_explicit(path);
    }
    loader.load_all().context("failed to load settings")
}

async fn run(engine: &mut Engine, args: Args) -> anyhow::Result<ExitCode> {
    match args.command {
        Some(Command::Tools { json }) => {
            let registry = engine.registry();
            if json {
                println!("{}", serde_json::to_string_pretty(&registry.schemas())?);
            } else {
                for tool in registry.iter() {
                    println!("{:<32} {}", tool.name(), tool.description());
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Some(Command::Status) => {
            for status in engine.statuses() {
                let mut line = format!(
                    "{:<20} {:<12} {} tools",
                    status.name,
                    status.state,
                    status.tool_count
                );
                if let Some(pid) = status.pid {
                    line.push_str(&format!("  pid {}", pid));
                }
                if let Some(error) = &status.error {
                    line.push_str(&format!("  ({})", error));
                }
                println!("{}", line);
            }
            Ok(ExitCode::SUCCESS)
        }

        Some(Command::Call { tool, args }) => {
            let args: Value = match args {
                Some(text) => serde_json::from_str(&text).context("arguments must be valid JSON")?,
                None => Value::Object(Default::default()),
            };
            let output = engine.registry().invoke(&tool, args).await;
            println!("{}", output);
            Ok(if output.is_failure() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Some(Command::Serve) => serve(engine).await,

        None => match args.prompt {
            Some(task) => {
                let turns = engine.run_task(&task).await?;
                let mut failed = false;
                for turn in turns.iter().filter(|t| t.tool.is_some()) {
                    failed |= turn.is_error;
                    println!("{}", turn.content);
                }
                Ok(if failed {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                })
            }
            None => {
                let token = engine.cancel_token();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        token.cancel();
                    }
                });

                println!("tether {} - /help for commands", env!("CARGO_PKG_VERSION"));
                let input = BufReader::new(tokio::io::stdin());
                engine.run_interactive(input, tokio::io::stdout()).await?;
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

/// stdin이 닫히거나 Ctrl-C가 올 때까지 MCP 서버로 동작
async fn serve(engine: &mut Engine) -> anyhow::Result<ExitCode> {
    let serve_config = &engine.config().server;
    let info = Implementation::new(
        serve_config.name.clone().unwrap_or_else(|| "tether".to_string()),
        serve_config
            .version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
    );
    let server = McpServer::new(info, engine.subscribe());

    let serving = server.serve(tokio::io::stdin(), tokio::io::stdout());
    tokio::pin!(serving);

    loop {
        tokio::select! {
            result = &mut serving => {
                result?;
                info!("MCP client closed the connection");
                break;
            }
            change = engine.next_change() => {
                match change? {
                    Some(event) => warn!(server = %event.server, "Tools retracted: {}", event.kind),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
