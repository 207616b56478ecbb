//! Audit trail of every pipeline run: the user request, the project
//! snapshot it ran against and each agent's response, in SQLite.

pub mod store;

pub use store::{AuditDb, AuditHandle};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPromptRecord {
    pub id: i64,
    pub prompt: String,
    pub prompt_hash: String,
    pub created_at: String,
    /// Number of pipeline runs started for this prompt.
    pub runs: i64,
}

/// Result of recording a user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptId {
    pub id: i64,
    /// False when the same prompt text had been recorded before.
    pub inserted: bool,
}

/// Row counts per agent table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub projects: i64,
    pub architect: i64,
    pub analyst: i64,
    pub developer: i64,
}
