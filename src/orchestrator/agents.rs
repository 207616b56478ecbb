use crate::commands::CommandsData;
use crate::errors::LlmError;
use crate::llm::{Agent, LlmClient, PromptLibrary, Replacements};
use crate::project::ProjectSnapshot;
use crate::task::{Task, TaskSet};
use crate::util::{parse_model_json, preview};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A model reply together with what could be parsed out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub raw: String,
    pub value: Option<T>,
}

/// The three agent roles over one [`LlmClient`].
#[derive(Clone)]
pub struct Agents {
    llm: Arc<dyn LlmClient>,
    prompts: PromptLibrary,
    model: String,
    endpoint: String,
}

impl Agents {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: PromptLibrary, model: &str, endpoint: &str) -> Self {
        Self {
            llm,
            prompts,
            model: model.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    fn project_replacements(snapshot: &ProjectSnapshot) -> Replacements {
        Replacements::new()
            .set("ProjectInfo", snapshot.info_json())
            .set_all("FilesWithMethods", &snapshot.files_with_methods)
    }

    async fn ask(&self, agent: Agent, replacements: &Replacements) -> Result<String, LlmError> {
        let prompt = self.prompts.load(agent)?.render(replacements);
        info!(%agent, model = %self.model, "asking agent");
        let reply = self
            .llm
            .exec(&prompt.system, &prompt.user, &self.model, &self.endpoint)
            .await?;
        debug!(%agent, reply = %preview(&reply, 300), "agent replied");
        Ok(reply)
    }

    /// Free-form architecture guidance for the request.
    pub async fn architect(
        &self,
        snapshot: &ProjectSnapshot,
        request: &str,
    ) -> Result<String, LlmError> {
        let replacements = Self::project_replacements(snapshot).set("UserRequest", request);
        self.ask(Agent::Architect, &replacements).await
    }

    /// Break a request into tasks.
    pub async fn analyst(
        &self,
        snapshot: &ProjectSnapshot,
        request: &str,
        guidance: &str,
    ) -> Result<Parsed<TaskSet>, LlmError> {
        let replacements = Self::project_replacements(snapshot)
            .set("UserRequest", request)
            .set("ArchitectPrompt", guidance);
        let raw = self.ask(Agent::Analyst, &replacements).await?;
        let value = parse_task_set(&raw);
        if value.is_none() {
            warn!(reply = %preview(&raw, 200), "analyst reply has no task list");
        }
        Ok(Parsed { raw, value })
    }

    /// Ask the analyst to break an oversized task into subtasks.
    pub async fn split(
        &self,
        snapshot: &ProjectSnapshot,
        task: &Task,
        guidance: &str,
    ) -> Result<Parsed<TaskSet>, LlmError> {
        self.analyst(snapshot, &split_request(task), guidance).await
    }

    /// Ask the analyst for replacement tasks that fix `errors`.
    pub async fn correct(
        &self,
        snapshot: &ProjectSnapshot,
        errors: &str,
        task: &Task,
        guidance: &str,
    ) -> Result<Parsed<TaskSet>, LlmError> {
        self.analyst(snapshot, &correction_request(errors, task), guidance)
            .await
    }

    /// Turn one task into concrete commands.
    pub async fn developer(
        &self,
        snapshot: &ProjectSnapshot,
        task: &Task,
        available_commands: &str,
    ) -> Result<Parsed<CommandsData>, LlmError> {
        let replacements = Self::project_replacements(snapshot)
            .set("TaskName", task.name.as_str())
            .set("TaskDescription", task.description.as_str())
            .set("TaskPriority", task.priority.to_string())
            .set("TaskStoryPoints", task.story_points.to_string())
            .set("Layers", task.layers_display())
            .set("RecommendedPattern", task.pattern_display())
            .set("AvailableMCPcommands", available_commands);
        let raw = self.ask(Agent::Developer, &replacements).await?;
        let value = parse_model_json::<CommandsData>(&raw);
        if value.is_none() {
            warn!(task = %task.name, reply = %preview(&raw, 200), "developer reply is not a command set");
        }
        Ok(Parsed { raw, value })
    }
}

pub fn split_request(task: &Task) -> String {
    format!(
        "Break it down into subtasks: {} {}",
        task.name, task.description
    )
}

pub fn correction_request(errors: &str, task: &Task) -> String {
    format!(
        "Correct the error: {}, by task: {} {}",
        errors, task.name, task.description
    )
}

#[derive(Deserialize)]
struct TaskEntries {
    #[serde(default)]
    tasks: Vec<Value>,
}

/// Accepts `{"tasks": [...]}` or a bare array of tasks. Entries are read one
/// at a time so a single malformed task is dropped instead of the whole list.
fn parse_task_set(raw: &str) -> Option<TaskSet> {
    let entries = parse_model_json::<TaskEntries>(raw)
        .map(|list| list.tasks)
        .filter(|tasks| !tasks.is_empty())
        .or_else(|| parse_model_json::<Vec<Value>>(raw))?;

    let mut tasks = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Task>(entry) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!(index, error = %e, "dropping malformed task"),
        }
    }
    (!tasks.is_empty()).then(|| TaskSet::new(tasks))
}
