use super::{PromptId, StageCounts, UserPromptRecord};
use crate::project::ProjectSnapshot;
use crate::protocol::ServerDescriptor;
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Async-safe handle to the audit database.
///
/// All access runs on the blocking pool via `spawn_blocking`.
#[derive(Clone)]
pub struct AuditHandle {
    inner: Arc<std::sync::Mutex<AuditDb>>,
}

impl AuditHandle {
    pub fn new(db: AuditDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&AuditDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("Audit DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Audit DB task panicked")?
    }
}

pub struct AuditDb {
    conn: Connection,
}

impl AuditDb {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS user_prompts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    prompt TEXT NOT NULL,
                    prompt_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_prompt_id INTEGER NOT NULL REFERENCES user_prompts(id),
                    root TEXT NOT NULL,
                    languages TEXT NOT NULL DEFAULT '[]',
                    frameworks TEXT NOT NULL DEFAULT '[]',
                    files TEXT NOT NULL DEFAULT '[]',
                    classes TEXT NOT NULL DEFAULT '[]',
                    methods TEXT NOT NULL DEFAULT '[]',
                    imports TEXT NOT NULL DEFAULT '[]',
                    files_with_methods TEXT NOT NULL DEFAULT '[]',
                    package_manager TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS architect_prompts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    user_prompt_id INTEGER NOT NULL REFERENCES user_prompts(id),
                    response TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS analyst_prompts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    user_prompt_id INTEGER NOT NULL REFERENCES user_prompts(id),
                    request TEXT NOT NULL,
                    tasks TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS developer_prompts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    user_prompt_id INTEGER NOT NULL REFERENCES user_prompts(id),
                    task TEXT NOT NULL,
                    commands TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS mcp_servers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    url TEXT,
                    description TEXT,
                    file_name TEXT NOT NULL DEFAULT '',
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS mcp_actions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    server_id INTEGER NOT NULL REFERENCES mcp_servers(id) ON DELETE CASCADE,
                    action TEXT NOT NULL,
                    parameters TEXT NOT NULL DEFAULT '{}'
                );

                CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    user_prompt_id INTEGER NOT NULL REFERENCES user_prompts(id),
                    started_at TEXT NOT NULL,
                    finished_at TEXT,
                    summary TEXT
                );
                ",
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    /// Record a user prompt once per distinct text (keyed by SHA-256).
    pub fn add_user_prompt(&self, prompt: &str) -> Result<PromptId> {
        let hash = sha256_hex(prompt);
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO user_prompts (prompt, prompt_hash) VALUES (?1, ?2)",
                params![prompt, hash],
            )
            .context("Failed to insert user prompt")?
            > 0;
        let id = self
            .conn
            .query_row(
                "SELECT id FROM user_prompts WHERE prompt_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .context("Failed to look up user prompt")?;
        Ok(PromptId { id, inserted })
    }

    pub fn list_user_prompts(&self) -> Result<Vec<UserPromptRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.prompt, p.prompt_hash, p.created_at,
                        (SELECT COUNT(*) FROM runs r WHERE r.user_prompt_id = p.id)
                 FROM user_prompts p ORDER BY p.id",
            )
            .context("Failed to prepare list_user_prompts")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserPromptRecord {
                    id: row.get(0)?,
                    prompt: row.get(1)?,
                    prompt_hash: row.get(2)?,
                    created_at: row.get(3)?,
                    runs: row.get(4)?,
                })
            })
            .context("Failed to query user prompts")?;
        let mut prompts = Vec::new();
        for row in rows {
            prompts.push(row.context("Failed to read user prompt row")?);
        }
        Ok(prompts)
    }

    pub fn add_project(
        &self,
        user_prompt_id: i64,
        root: &Path,
        snapshot: &ProjectSnapshot,
    ) -> Result<i64> {
        let json = |v: &Vec<String>| serde_json::to_string(v).unwrap_or_else(|_| "[]".into());
        self.conn
            .execute(
                "INSERT INTO projects (user_prompt_id, root, languages, frameworks, files, classes,
                                       methods, imports, files_with_methods, package_manager)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user_prompt_id,
                    root.to_string_lossy(),
                    json(&snapshot.languages),
                    json(&snapshot.frameworks),
                    json(&snapshot.files),
                    json(&snapshot.classes),
                    json(&snapshot.methods),
                    json(&snapshot.imports),
                    json(&snapshot.files_with_methods),
                    snapshot.package_manager,
                ],
            )
            .context("Failed to insert project")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_architect_prompt(
        &self,
        project_id: i64,
        user_prompt_id: i64,
        response: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO architect_prompts (project_id, user_prompt_id, response) VALUES (?1, ?2, ?3)",
                params![project_id, user_prompt_id, response],
            )
            .context("Failed to insert architect prompt")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_analyst_prompt(
        &self,
        project_id: i64,
        user_prompt_id: i64,
        request: &str,
        tasks_json: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO analyst_prompts (project_id, user_prompt_id, request, tasks) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, user_prompt_id, request, tasks_json],
            )
            .context("Failed to insert analyst prompt")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_developer_prompt(
        &self,
        project_id: i64,
        user_prompt_id: i64,
        task_json: &str,
        commands_json: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO developer_prompts (project_id, user_prompt_id, task, commands) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, user_prompt_id, task_json, commands_json],
            )
            .context("Failed to insert developer prompt")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Upsert a server descriptor by name, replacing its action list.
    pub fn upsert_mcp_server(&self, server: &ServerDescriptor) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO mcp_servers (name, url, description, file_name) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET url = excluded.url,
                     description = excluded.description,
                     file_name = excluded.file_name,
                     updated_at = datetime('now')",
                params![server.name, server.url, server.description, server.file_name],
            )
            .context("Failed to upsert MCP server")?;
        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM mcp_servers WHERE name = ?1",
                params![server.name],
                |row| row.get(0),
            )
            .context("Failed to look up MCP server")?;
        self.conn
            .execute("DELETE FROM mcp_actions WHERE server_id = ?1", params![id])
            .context("Failed to clear MCP actions")?;
        for action in &server.actions {
            let parameters = serde_json::to_string(&action.parameters)?;
            self.conn
                .execute(
                    "INSERT INTO mcp_actions (server_id, action, parameters) VALUES (?1, ?2, ?3)",
                    params![id, action.action, parameters],
                )
                .context("Failed to insert MCP action")?;
        }
        Ok(id)
    }

    pub fn start_run(&self, user_prompt_id: i64) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO runs (run_id, user_prompt_id, started_at) VALUES (?1, ?2, ?3)",
                params![run_id.to_string(), user_prompt_id, chrono::Utc::now().to_rfc3339()],
            )
            .context("Failed to insert run")?;
        Ok(run_id)
    }

    pub fn finish_run(&self, run_id: Uuid, summary_json: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, summary = ?2 WHERE run_id = ?3",
                params![chrono::Utc::now().to_rfc3339(), summary_json, run_id.to_string()],
            )
            .context("Failed to finish run")?;
        Ok(())
    }

    /// Stored summary of a run, if it finished.
    pub fn run_summary(&self, run_id: Uuid) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT summary FROM runs WHERE run_id = ?1",
                params![run_id.to_string()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .context("Failed to query run")
            .map(Option::flatten)
    }

    pub fn stage_counts(&self) -> Result<StageCounts> {
        let count = |table: &str| -> Result<i64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .with_context(|| format!("Failed to count {}", table))
        };
        Ok(StageCounts {
            projects: count("projects")?,
            architect: count("architect_prompts")?,
            analyst: count("analyst_prompts")?,
            developer: count("developer_prompts")?,
        })
    }

    pub fn mcp_action_names(&self, server_name: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT a.action FROM mcp_actions a JOIN mcp_servers s ON s.id = a.server_id
                 WHERE s.name = ?1 ORDER BY a.id",
            )
            .context("Failed to prepare mcp_action_names")?;
        let rows = stmt
            .query_map(params![server_name], |row| row.get(0))
            .context("Failed to query MCP actions")?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row.context("Failed to read MCP action row")?);
        }
        Ok(names)
    }
}
