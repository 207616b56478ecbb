//! Per-agent prompt templates with `{~Key~}` placeholders.
//!
//! A template is a JSON object holding `systemMessage<Lang>` and
//! `userMessage<Lang>` strings, where `<Lang>` is the configured language
//! code with its first letter upper-cased (`en` -> `En`). A project can
//! override any agent with `.devloop/prompts/<agent>.json`; otherwise the
//! built-in copy is used.

use crate::errors::LlmError;
use regex::Regex;
use rust_embed::RustEmbed;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

#[derive(RustEmbed)]
#[folder = "prompts/"]
struct DefaultPrompts;

static UNREPLACED: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{~[^~{}]+~\}").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Agent {
    Architect,
    Analyst,
    Developer,
}

impl Agent {
    pub const ALL: [Agent; 3] = [Agent::Architect, Agent::Analyst, Agent::Developer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Architect => "architect",
            Agent::Analyst => "analyst",
            Agent::Developer => "developer",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Placeholder values, keyed by bare name (`UserRequest`, not
/// `{~UserRequest~}`). Multi-valued keys are joined with ", ".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replacements {
    values: BTreeMap<String, Vec<String>>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), vec![value.into()]);
        self
    }

    pub fn set_all(mut self, key: &str, values: &[String]) -> Self {
        self.values.insert(key.to_string(), values.to_vec());
        self
    }

    /// Replace every known placeholder, then drop any line still holding an
    /// unknown one.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (key, values) in &self.values {
            out = out.replace(&format!("{{~{}~}}", key), &values.join(", "));
        }
        match UNREPLACED.as_ref() {
            Some(re) if re.is_match(&out) => out
                .lines()
                .filter(|line| !re.is_match(line))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => out,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    /// Pick the message pair for `language` out of a template JSON object.
    pub fn from_json(json: &str, language: &str) -> Option<Self> {
        let map: HashMap<String, serde_json::Value> = serde_json::from_str(json).ok()?;
        let suffix = language_suffix(language);
        let system = map.get(&format!("systemMessage{}", suffix))?.as_str()?;
        let user = map.get(&format!("userMessage{}", suffix))?.as_str()?;
        Some(Self {
            system: system.to_string(),
            user: user.to_string(),
        })
    }

    pub fn render(&self, replacements: &Replacements) -> RenderedPrompt {
        RenderedPrompt {
            system: replacements.apply(&self.system),
            user: replacements.apply(&self.user),
        }
    }
}

fn language_suffix(language: &str) -> String {
    let mut chars = language.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "En".to_string(),
    }
}

/// Resolves agent templates: project override first, then built-in.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
    language: String,
}

impl PromptLibrary {
    pub fn new(dir: &Path, language: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            language: language.to_string(),
        }
    }

    pub fn load(&self, agent: Agent) -> Result<PromptTemplate, LlmError> {
        let override_path = self.dir.join(agent.file_name());
        if override_path.is_file() {
            match std::fs::read_to_string(&override_path) {
                Ok(json) => match PromptTemplate::from_json(&json, &self.language) {
                    Some(template) => {
                        debug!(%agent, file = %override_path.display(), "using project prompt");
                        return Ok(template);
                    }
                    None => warn!(%agent, language = %self.language, file = %override_path.display(), "project prompt lacks messages for language, using built-in"),
                },
                Err(e) => warn!(%agent, error = %e, "unreadable project prompt, using built-in"),
            }
        }
        Self::builtin(agent, &self.language)
    }

    pub fn builtin(agent: Agent, language: &str) -> Result<PromptTemplate, LlmError> {
        DefaultPrompts::get(&agent.file_name())
            .and_then(|file| std::str::from_utf8(&file.data).ok().map(str::to_string))
            .and_then(|json| PromptTemplate::from_json(&json, language))
            .ok_or_else(|| LlmError::TemplateMissing(format!("{} ({})", agent, language)))
    }

    /// Raw built-in template file, for writing out editable copies.
    pub fn builtin_source(agent: Agent) -> Option<String> {
        DefaultPrompts::get(&agent.file_name())
            .and_then(|file| String::from_utf8(file.data.into_owned()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_replacements_join_multi_values() {
        let text = "Files: {~FilesWithMethods~}\nAsk: {~UserRequest~}";
        let out = Replacements::new()
            .set_all(
                "FilesWithMethods",
                &["Player:Jump".to_string(), "Enemy:Spawn".to_string()],
            )
            .set("UserRequest", "add double jump")
            .apply(text);
        assert_eq!(out, "Files: Player:Jump, Enemy:Spawn\nAsk: add double jump");
    }

    #[test]
    fn test_unreplaced_lines_are_dropped() {
        let text = "Project: {~ProjectInfo~}\nRequest: {~UserRequest~}\nDone.";
        let out = Replacements::new().set("UserRequest", "x").apply(text);
        assert_eq!(out, "Request: x\nDone.");
    }

    #[test]
    fn test_language_suffix() {
        assert_eq!(language_suffix("en"), "En");
        assert_eq!(language_suffix("ru"), "Ru");
        assert_eq!(language_suffix(""), "En");
    }

    #[test]
    fn test_builtin_templates_exist_for_every_agent() {
        for agent in Agent::ALL {
            let template = PromptLibrary::builtin(agent, "en").unwrap();
            assert!(!template.system.is_empty());
            assert!(template.user.contains("{~"));
        }
    }

    #[test]
    fn test_missing_language_is_reported() {
        let err = PromptLibrary::builtin(Agent::Analyst, "xx").unwrap_err();
        assert!(matches!(err, LlmError::TemplateMissing(_)));
    }

    #[test]
    fn test_project_override_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("architect.json"),
            r#"{"systemMessageEn": "custom", "userMessageEn": "{~UserRequest~}"}"#,
        )
        .unwrap();
        let library = PromptLibrary::new(dir.path(), "en");

        let architect = library.load(Agent::Architect).unwrap();
        assert_eq!(architect.system, "custom");
        let developer = library.load(Agent::Developer).unwrap();
        assert_ne!(developer.system, "custom");
    }
}
