use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devloop::devloop_config::{CliOverrides, DevloopConfig, LoggingSection};
use devloop::logging::init_tracing;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "devloop")]
#[command(version, about = "Plan, apply and verify code changes against a running target")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for one change request
    Run {
        /// The change request, in plain language
        request: String,

        /// Chat endpoint of the model server
        #[arg(long)]
        llm_endpoint: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Control endpoint of the target application
        #[arg(long)]
        protocol_endpoint: Option<String>,

        /// Correction budget per task
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Apply a saved command set without calling any model
    Apply {
        /// JSON file with fileCommands, methodCommands and mcpCommands
        commands_file: PathBuf,

        #[arg(long)]
        protocol_endpoint: Option<String>,
    },
    /// Send one action to the target and print its response
    Send {
        action: String,

        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        #[arg(long)]
        protocol_endpoint: Option<String>,
    },
    /// List recorded change requests
    History,
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Serve a scripted target for local dry runs
    ServeMock {
        #[arg(long, default_value = "127.0.0.1:8090")]
        addr: String,

        /// Log script: one get-log answer per blank-line separated block
        #[arg(long)]
        logs: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default devloop.toml and editable prompt templates
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides {
            verbose: self.verbose,
            ..Default::default()
        };
        match &self.command {
            Commands::Run {
                llm_endpoint,
                model,
                protocol_endpoint,
                max_attempts,
                ..
            } => {
                overrides.llm_endpoint = llm_endpoint.clone();
                overrides.model = model.clone();
                overrides.protocol_endpoint = protocol_endpoint.clone();
                overrides.max_attempts = *max_attempts;
            }
            Commands::Apply {
                protocol_endpoint, ..
            }
            | Commands::Send {
                protocol_endpoint, ..
            } => overrides.protocol_endpoint = protocol_endpoint.clone(),
            _ => {}
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::ServeMock { addr, logs } = &cli.command {
        let logging = LoggingSection {
            level: if cli.verbose { "debug" } else { "info" }.to_string(),
            file: false,
        };
        init_tracing(&logging, None)?;
        return cmd::cmd_serve_mock(addr, logs.as_deref()).await;
    }

    let config = DevloopConfig::new(&project_dir)?.with_cli(&cli.overrides());
    let log_dir = matches!(cli.command, Commands::Run { .. }).then(|| config.paths.log_dir.clone());
    init_tracing(&config.toml.logging, log_dir.as_deref())?;

    match &cli.command {
        Commands::Run { request, .. } => cmd::cmd_run(&config, request).await?,
        Commands::Apply { commands_file, .. } => cmd::cmd_apply(&config, commands_file).await?,
        Commands::Send { action, params, .. } => cmd::cmd_send(&config, action, params).await?,
        Commands::History => cmd::cmd_history(&config).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::ServeMock { .. } => {}
    }

    Ok(())
}
