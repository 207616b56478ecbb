//! Offline dispatch: `devloop apply <file>` and `devloop send <action>`.

use anyhow::{Context, Result};
use devloop::commands::CommandsData;
use devloop::devloop_config::DevloopConfig;
use devloop::dispatch::{KindOutcome, MutationDispatcher};
use devloop::protocol::{HttpProtocolClient, ProtocolClient, ServerRegistry};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

fn protocol_client(config: &DevloopConfig) -> Result<HttpProtocolClient> {
    let registry = ServerRegistry::load(&config.paths.servers_dir);
    HttpProtocolClient::new(
        &config.protocol_endpoint(&registry),
        config.protocol_timeout(&registry),
    )
}

pub async fn cmd_apply(config: &DevloopConfig, commands_file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(commands_file)
        .with_context(|| format!("Failed to read {}", commands_file.display()))?;
    let commands: CommandsData = serde_json::from_str(&content)
        .with_context(|| format!("Invalid command set in {}", commands_file.display()))?;
    if commands.is_empty() {
        println!("No commands to apply.");
        return Ok(());
    }

    let dispatcher = MutationDispatcher::with_protocol(Arc::new(protocol_client(config)?));
    let report = dispatcher
        .dispatch(&commands, &config.paths.project_dir)
        .await;

    for (kind, outcome) in &report.outcomes {
        match outcome {
            KindOutcome::Skipped => {}
            KindOutcome::Applied { count } => println!("{}: applied {}", kind, count),
            KindOutcome::Failed { count, error } => {
                println!("{}: FAILED ({} commands rolled back): {}", kind, count, error)
            }
        }
    }
    if !report.protocol_output.is_empty() {
        println!("{}", report.protocol_output);
    }
    if report.has_failures() {
        anyhow::bail!("Some commands failed to apply");
    }
    Ok(())
}

pub async fn cmd_send(config: &DevloopConfig, action: &str, params: &str) -> Result<()> {
    let parameters: Map<String, Value> =
        serde_json::from_str(params).context("--params must be a JSON object")?;
    let client = protocol_client(config)?;
    let response = client.send(action, &parameters).await?;
    println!("{}", response);
    Ok(())
}
