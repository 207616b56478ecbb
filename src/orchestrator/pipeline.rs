use super::agents::{Agents, Parsed};
use super::lock::RunLock;
use super::verify::{Corrector, VcsTarget, VerificationLoop, VerificationReport};
use crate::audit::{AuditDb, AuditHandle};
use crate::commands::CommandsData;
use crate::config::ProjectPaths;
use crate::dispatch::{KindOutcome, MutationDispatcher};
use crate::errors::PipelineError;
use crate::project::{ProjectScanner, ProjectSnapshot};
use crate::protocol::{ProtocolClient, ServerRegistry};
use crate::task::{Task, TaskSet};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Generations of subtasks that may themselves be split again.
pub const MAX_SPLIT_DEPTH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub split_threshold: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: super::verify::DEFAULT_MAX_ATTEMPTS,
            split_threshold: crate::task::DEFAULT_SPLIT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Replaced by subtasks appended to the task list.
    Split { children: usize },
    /// The developer reply could not be used.
    Skipped { reason: String },
    Verified {
        report: VerificationReport,
        dispatch_failures: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub number: u32,
    pub name: String,
    #[serde(flatten)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub user_prompt_id: i64,
    pub tasks: Vec<TaskSummary>,
}

impl RunSummary {
    pub fn satisfied(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| {
                matches!(&t.status, TaskStatus::Verified { report, .. }
                    if report.outcome == super::verify::VerifyOutcome::Satisfied)
            })
            .count()
    }
}

/// Ids every stage record hangs off.
#[derive(Debug, Clone, Copy)]
struct RunIds {
    user_prompt: i64,
    project: i64,
}

/// Everything one run needs, built once by the caller.
pub struct Pipeline {
    paths: ProjectPaths,
    agents: Agents,
    scanner: Arc<dyn ProjectScanner>,
    protocol: Arc<dyn ProtocolClient>,
    dispatcher: MutationDispatcher,
    registry: ServerRegistry,
    audit: AuditHandle,
    vcs: Option<VcsTarget>,
    settings: PipelineSettings,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paths: ProjectPaths,
        agents: Agents,
        scanner: Arc<dyn ProjectScanner>,
        protocol: Arc<dyn ProtocolClient>,
        registry: ServerRegistry,
        audit: AuditHandle,
        vcs: Option<VcsTarget>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            dispatcher: MutationDispatcher::with_protocol(protocol.clone()),
            paths,
            agents,
            scanner,
            protocol,
            registry,
            audit,
            vcs,
            settings,
        }
    }

    /// Run one user request end to end. Only setup failures are errors;
    /// everything after the first snapshot degrades per task.
    pub async fn run(&self, request: &str) -> Result<RunSummary, PipelineError> {
        let _lock = RunLock::acquire(&self.paths.lock_file)?;

        let owned = request.to_string();
        let prompt = self.audit.call(move |db| db.add_user_prompt(&owned)).await?;
        if !prompt.inserted {
            info!(id = prompt.id, "request seen before");
        }
        let run_id = self.audit.call(move |db| db.start_run(prompt.id)).await?;
        info!(%run_id, "pipeline run started");

        let snapshot = self.snapshot()?;
        let root = self.paths.project_dir.clone();
        let recorded = snapshot.clone();
        let project = self
            .audit
            .call(move |db| db.add_project(prompt.id, &root, &recorded))
            .await?;
        let ids = RunIds {
            user_prompt: prompt.id,
            project,
        };
        self.record_servers().await;

        let guidance = match self.agents.architect(&snapshot, request).await {
            Ok(text) => {
                let response = text.clone();
                self.record("architect", move |db| {
                    db.add_architect_prompt(ids.project, ids.user_prompt, &response)
                })
                .await;
                text
            }
            Err(e) => {
                warn!(error = %e, "architect failed, continuing without guidance");
                String::new()
            }
        };

        let mut summary = RunSummary {
            run_id,
            user_prompt_id: prompt.id,
            tasks: Vec::new(),
        };
        let Some(mut tasks) = self.analyse(&snapshot, request, &guidance, ids).await else {
            warn!("analyst produced no tasks");
            self.finish(&summary).await;
            return Ok(summary);
        };

        let split = self.split_oversized(&mut tasks, &snapshot, &guidance, ids).await;
        info!(tasks = tasks.len(), split = split.len(), "task list ready");

        let corrector = AgentCorrector {
            pipeline: self,
            guidance: &guidance,
            ids,
        };
        let verifier = VerificationLoop::new(
            self.protocol.clone(),
            self.vcs.clone(),
            self.settings.max_attempts,
        );

        let mut snapshot = snapshot;
        for (index, task) in tasks.iter().enumerate() {
            if let Some((_, children)) = split.iter().find(|(i, _)| *i == index) {
                summary.tasks.push(TaskSummary {
                    number: task.number,
                    name: task.name.clone(),
                    status: TaskStatus::Split {
                        children: *children,
                    },
                });
                continue;
            }
            if index > 0 {
                snapshot = self.snapshot().unwrap_or(snapshot);
            }
            info!(number = task.number, task = %task.name, "executing task");
            let status = self
                .execute(task, &snapshot, ids, &verifier, &corrector)
                .await;
            summary.tasks.push(TaskSummary {
                number: task.number,
                name: task.name.clone(),
                status,
            });
        }

        info!(
            tasks = summary.tasks.len(),
            satisfied = summary.satisfied(),
            "pipeline run finished"
        );
        self.finish(&summary).await;
        Ok(summary)
    }

    fn snapshot(&self) -> Result<ProjectSnapshot> {
        self.scanner.scan(&self.paths.project_dir)
    }

    async fn record<F, R>(&self, what: &'static str, f: F) -> Option<R>
    where
        F: FnOnce(&AuditDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        match self.audit.call(f).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(what, error = %e, "audit write failed");
                None
            }
        }
    }

    async fn record_servers(&self) {
        for server in self.registry.servers() {
            let server = server.clone();
            self.record("server", move |db| db.upsert_mcp_server(&server))
                .await;
        }
    }

    async fn finish(&self, summary: &RunSummary) {
        let run_id = summary.run_id;
        let json = serde_json::to_string(summary).unwrap_or_default();
        self.record("run", move |db| db.finish_run(run_id, &json)).await;
    }

    async fn analyse(
        &self,
        snapshot: &ProjectSnapshot,
        request: &str,
        guidance: &str,
        ids: RunIds,
    ) -> Option<TaskSet> {
        let parsed = match self.agents.analyst(snapshot, request, guidance).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "analyst failed");
                return None;
            }
        };
        self.record_analyst(request, &parsed, ids).await;
        parsed.value
    }

    async fn record_analyst(&self, request: &str, parsed: &Parsed<TaskSet>, ids: RunIds) {
        let request = request.to_string();
        let tasks = match &parsed.value {
            Some(set) => serde_json::to_string(set).unwrap_or_else(|_| parsed.raw.clone()),
            None => parsed.raw.clone(),
        };
        self.record("analyst", move |db| {
            db.add_analyst_prompt(ids.project, ids.user_prompt, &request, &tasks)
        })
        .await;
    }

    /// Walk the task list, splitting oversized tasks and appending their
    /// children, which are checked in turn. Children [`MAX_SPLIT_DEPTH`]
    /// generations down run whole. Returns the index of each split parent
    /// with its child count.
    async fn split_oversized(
        &self,
        tasks: &mut TaskSet,
        snapshot: &ProjectSnapshot,
        guidance: &str,
        ids: RunIds,
    ) -> Vec<(usize, usize)> {
        let threshold = self.settings.split_threshold;
        // Split generation of each task, parallel to `tasks`.
        let mut depths = vec![0u32; tasks.len()];
        let mut split = Vec::new();
        let mut index = 0;
        while index < tasks.len() {
            let current = index;
            index += 1;
            let parent = tasks.tasks[current].clone();
            if !parent.is_oversized(threshold) {
                continue;
            }
            let depth = depths[current];
            if depth >= MAX_SPLIT_DEPTH {
                warn!(task = %parent.name, depth, "split depth reached, running task whole");
                continue;
            }
            info!(task = %parent.name, points = parent.story_points, depth, "splitting oversized task");
            let parsed = match self.agents.split(snapshot, &parent, guidance).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(task = %parent.name, error = %e, "split failed, running task whole");
                    continue;
                }
            };
            self.record_analyst(&super::agents::split_request(&parent), &parsed, ids)
                .await;
            match parsed.value {
                Some(children) if !children.is_empty() => {
                    split.push((current, children.len()));
                    depths.resize(depths.len() + children.len(), depth + 1);
                    tasks.append(children.tasks);
                }
                _ => warn!(task = %parent.name, "split returned no subtasks, running task whole"),
            }
        }
        split
    }

    /// Developer call for one task, then dispatch. Returns the failed
    /// command kinds, or why the task produced no commands.
    async fn develop(
        &self,
        task: &Task,
        snapshot: &ProjectSnapshot,
        ids: RunIds,
    ) -> Result<Vec<String>, String> {
        let parsed = self
            .agents
            .developer(snapshot, task, &self.registry.commands_text())
            .await
            .map_err(|e| e.to_string())?;

        let task_json = serde_json::to_string(task).unwrap_or_default();
        let commands_json = match &parsed.value {
            Some(c) => serde_json::to_string(c).unwrap_or_default(),
            None => parsed.raw.clone(),
        };
        self.record("developer", move |db| {
            db.add_developer_prompt(ids.project, ids.user_prompt, &task_json, &commands_json)
        })
        .await;

        let commands: CommandsData = parsed
            .value
            .ok_or_else(|| "developer reply did not parse".to_string())?;
        let report = self
            .dispatcher
            .dispatch(&commands, &self.paths.project_dir)
            .await;
        Ok(report
            .outcomes
            .into_iter()
            .filter_map(|(kind, outcome)| match outcome {
                KindOutcome::Failed { error, .. } => Some(format!("{}: {}", kind, error)),
                _ => None,
            })
            .collect())
    }

    async fn execute(
        &self,
        task: &Task,
        snapshot: &ProjectSnapshot,
        ids: RunIds,
        verifier: &VerificationLoop,
        corrector: &AgentCorrector<'_>,
    ) -> TaskStatus {
        match self.develop(task, snapshot, ids).await {
            Ok(dispatch_failures) => TaskStatus::Verified {
                report: verifier.run(task, corrector).await,
                dispatch_failures,
            },
            Err(reason) => {
                warn!(task = %task.name, %reason, "task skipped");
                TaskStatus::Skipped { reason }
            }
        }
    }
}

/// Corrections through the analyst and developer agents.
struct AgentCorrector<'a> {
    pipeline: &'a Pipeline,
    guidance: &'a str,
    ids: RunIds,
}

#[async_trait]
impl Corrector for AgentCorrector<'_> {
    async fn correct(&self, task: &Task, errors: &str) -> usize {
        let pipeline = self.pipeline;
        let snapshot = match pipeline.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "re-snapshot failed, skipping correction");
                return 0;
            }
        };
        let parsed = match pipeline
            .agents
            .correct(&snapshot, errors, task, self.guidance)
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "correction analyst failed");
                return 0;
            }
        };
        pipeline
            .record_analyst(&super::agents::correction_request(errors, task), &parsed, self.ids)
            .await;

        let mut dispatched = 0;
        for mut fix in parsed.value.unwrap_or_default() {
            fix.append_error_context(errors);
            match pipeline.develop(&fix, &snapshot, self.ids).await {
                Ok(_) => dispatched += 1,
                Err(reason) => warn!(task = %fix.name, %reason, "correction task skipped"),
            }
        }
        dispatched
    }
}
