//! Full pipeline run: `devloop run "<request>"`.

use anyhow::Result;
use devloop::audit::{AuditDb, AuditHandle};
use devloop::devloop_config::DevloopConfig;
use devloop::errors::PipelineError;
use devloop::llm::{HttpLlmClient, PromptLibrary};
use devloop::orchestrator::{Agents, Pipeline, PipelineSettings, TaskStatus, VcsTarget};
use devloop::project::SourceScanner;
use devloop::protocol::{HttpProtocolClient, ServerRegistry};
use devloop::tracker::GitTracker;
use std::sync::Arc;
use tracing::warn;

pub async fn cmd_run(config: &DevloopConfig, request: &str) -> Result<()> {
    let paths = &config.paths;
    paths.ensure_directories()?;
    for warning in config.toml.validate() {
        warn!("{}", warning);
    }

    let db = AuditDb::new(&paths.db_file).map_err(|source| PipelineError::AuditStore {
        path: paths.db_file.clone(),
        source,
    })?;
    let registry = ServerRegistry::load(&paths.servers_dir);
    let protocol = Arc::new(HttpProtocolClient::new(
        &config.protocol_endpoint(&registry),
        config.protocol_timeout(&registry),
    )?);
    let llm = Arc::new(HttpLlmClient::new(config.api_key(), config.llm_timeout())?);
    let agents = Agents::new(
        llm,
        PromptLibrary::new(&paths.prompts_dir, &config.toml.llm.language),
        &config.toml.llm.model,
        &config.toml.llm.endpoint,
    );
    let vcs = config.git_repo().map(|repo_path| VcsTarget {
        vcs: Arc::new(GitTracker::new()),
        repo_path,
        remote: config.toml.git.remote.clone(),
        branch: config.toml.git.branch.clone(),
    });
    let settings = PipelineSettings {
        max_attempts: config.toml.pipeline.max_attempts,
        split_threshold: config.toml.pipeline.split_threshold,
    };

    let pipeline = Pipeline::new(
        paths.clone(),
        agents,
        Arc::new(SourceScanner::new()),
        protocol,
        registry,
        AuditHandle::new(db),
        vcs,
        settings,
    );
    let summary = pipeline.run(request).await?;

    println!();
    println!("Run {}", summary.run_id);
    if summary.tasks.is_empty() {
        println!("  No tasks were produced.");
    }
    for task in &summary.tasks {
        let status = match &task.status {
            TaskStatus::Split { children } => format!("split into {} subtasks", children),
            TaskStatus::Skipped { reason } => format!("skipped: {}", reason),
            TaskStatus::Verified {
                report,
                dispatch_failures,
            } => {
                let mut line = format!(
                    "{:?} after {} checks, {} corrections",
                    report.outcome, report.checks, report.corrections
                );
                if let Some(sha) = &report.committed {
                    line.push_str(&format!(", committed {}", &sha[..sha.len().min(8)]));
                }
                if report.reverted {
                    line.push_str(", reverted");
                }
                if report.log_unreachable {
                    line.push_str(", target log unreachable");
                }
                if !dispatch_failures.is_empty() {
                    line.push_str(&format!(", failed: {}", dispatch_failures.join("; ")));
                }
                line
            }
        };
        println!("  {:>3}. {} - {}", task.number, task.name, status);
    }
    println!();
    println!(
        "{} of {} tasks verified",
        summary.satisfied(),
        summary.tasks.len()
    );
    Ok(())
}
