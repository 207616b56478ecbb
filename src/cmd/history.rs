//! Recorded requests: `devloop history`.

use anyhow::Result;
use devloop::audit::{AuditDb, AuditHandle};
use devloop::devloop_config::DevloopConfig;
use devloop::util::preview;

pub async fn cmd_history(config: &DevloopConfig) -> Result<()> {
    let db_file = &config.paths.db_file;
    if !db_file.exists() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    let audit = AuditHandle::new(AuditDb::new(db_file)?);
    let prompts = audit.call(|db| db.list_user_prompts()).await?;
    let counts = audit.call(|db| db.stage_counts()).await?;

    if prompts.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    for prompt in &prompts {
        println!(
            "{:>4}  {}  runs: {:<3} {}",
            prompt.id,
            prompt.created_at,
            prompt.runs,
            preview(&prompt.prompt, 60)
        );
    }
    println!();
    println!(
        "{} requests, {} snapshots, {} architect / {} analyst / {} developer replies",
        prompts.len(),
        counts.projects,
        counts.architect,
        counts.analyst,
        counts.developer
    );
    Ok(())
}
