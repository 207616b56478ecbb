//! Layered configuration for devloop.
//!
//! Settings are read from `.devloop/devloop.toml`, then overridden by
//! `DEVLOOP_*` environment variables (a project `.env` is loaded first),
//! then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [llm]
//! endpoint = "http://localhost:11434/api/chat"
//! model = "llama3"
//! language = "en"
//! timeout_secs = 300
//!
//! [protocol]
//! endpoint = "http://localhost:8090/"
//! timeout_secs = 300
//! servers_dir = ".devloop/mcp-servers"
//!
//! [git]
//! repo_path = "."
//! remote = "origin"
//! branch = "main"
//!
//! [pipeline]
//! max_attempts = 10
//! split_threshold = 21
//!
//! [logging]
//! level = "info"
//! file = true
//! ```

use crate::config::ProjectPaths;
use crate::protocol::ServerRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PROTOCOL_ENDPOINT: &str = "http://localhost:8090/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer token; empty means none.
    #[serde(default)]
    pub api_key: String,
    /// Prompt template language suffix.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/api/chat".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_model(),
            api_key: String::new(),
            language: default_language(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSection {
    /// Unset falls back to the first active server descriptor's url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_servers_dir")]
    pub servers_dir: PathBuf,
}

fn default_servers_dir() -> PathBuf {
    PathBuf::from(".devloop/mcp-servers")
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            servers_dir: default_servers_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSection {
    /// Empty disables commit and reset.
    #[serde(default)]
    pub repo_path: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            repo_path: String::new(),
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Correction budget per task.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Story points above which a task is split.
    #[serde(default = "default_split_threshold")]
    pub split_threshold: u32,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_split_threshold() -> u32 {
    crate::task::DEFAULT_SPLIT_THRESHOLD
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            split_threshold: default_split_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    /// Also write to `.devloop/logs/devloop.log`.
    #[serde(default = "default_file_logging")]
    pub file: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_logging() -> bool {
    true
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: default_file_logging(),
        }
    }
}

/// The complete devloop.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevloopToml {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DevloopToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse devloop.toml")
    }

    /// Returns the defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize devloop.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `DEVLOOP_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("DEVLOOP_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Some(v) = get("DEVLOOP_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("DEVLOOP_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("DEVLOOP_LANGUAGE") {
            self.llm.language = v;
        }
        if let Some(v) = get("DEVLOOP_PROTOCOL_ENDPOINT") {
            self.protocol.endpoint = Some(v);
        }
        if let Some(v) = get("DEVLOOP_GIT_REPO") {
            self.git.repo_path = v;
        }
        if let Some(v) = get("DEVLOOP_MAX_ATTEMPTS") {
            self.pipeline.max_attempts = v
                .parse()
                .with_context(|| format!("Invalid DEVLOOP_MAX_ATTEMPTS '{}'", v))?;
        }
        if let Some(v) = get("DEVLOOP_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pipeline.max_attempts == 0 {
            warnings.push("pipeline.max_attempts is 0: failing tasks are reverted immediately".into());
        }
        if !self.llm.endpoint.starts_with("http://") && !self.llm.endpoint.starts_with("https://") {
            warnings.push(format!(
                "llm.endpoint '{}' is not an http(s) URL",
                self.llm.endpoint
            ));
        }
        if self.llm.timeout_secs == 0 || self.protocol.timeout_secs == 0 {
            warnings.push("a timeout of 0 seconds fails every request".into());
        }
        warnings
    }
}

/// CLI flags that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub llm_endpoint: Option<String>,
    pub model: Option<String>,
    pub protocol_endpoint: Option<String>,
    pub max_attempts: Option<u32>,
    pub verbose: bool,
}

/// Effective configuration for one project.
#[derive(Debug, Clone)]
pub struct DevloopConfig {
    pub paths: ProjectPaths,
    pub toml: DevloopToml,
}

impl DevloopConfig {
    /// Load file and environment layers for `project_dir`.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let paths = ProjectPaths::new(project_dir)?;
        let _ = dotenvy::from_path(paths.project_dir.join(".env"));
        let mut toml = DevloopToml::load_or_default(&paths.config_file)?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        Ok(Self::from_parts(paths, toml))
    }

    pub fn from_parts(paths: ProjectPaths, toml: DevloopToml) -> Self {
        let paths = paths.with_servers_dir(&toml.protocol.servers_dir);
        Self { paths, toml }
    }

    pub fn with_cli(mut self, cli: &CliOverrides) -> Self {
        if let Some(v) = &cli.llm_endpoint {
            self.toml.llm.endpoint = v.clone();
        }
        if let Some(v) = &cli.model {
            self.toml.llm.model = v.clone();
        }
        if let Some(v) = &cli.protocol_endpoint {
            self.toml.protocol.endpoint = Some(v.clone());
        }
        if let Some(v) = cli.max_attempts {
            self.toml.pipeline.max_attempts = v;
        }
        if cli.verbose {
            self.toml.logging.level = "debug".to_string();
        }
        self
    }

    pub fn api_key(&self) -> Option<String> {
        Some(self.toml.llm.api_key.clone()).filter(|k| !k.is_empty())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.llm.timeout_secs)
    }

    /// Protocol endpoint: explicit setting, then the first active server,
    /// then the default.
    pub fn protocol_endpoint(&self, registry: &ServerRegistry) -> String {
        self.toml
            .protocol
            .endpoint
            .clone()
            .or_else(|| registry.endpoint().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_PROTOCOL_ENDPOINT.to_string())
    }

    /// Descriptor timeout wins over the configured one.
    pub fn protocol_timeout(&self, registry: &ServerRegistry) -> Duration {
        registry
            .timeout()
            .unwrap_or_else(|| Duration::from_secs(self.toml.protocol.timeout_secs))
    }

    /// Repository used for commit and reset, `None` when disabled.
    pub fn git_repo(&self) -> Option<PathBuf> {
        let raw = self.toml.git.repo_path.trim();
        if raw.is_empty() {
            return None;
        }
        let path = Path::new(raw);
        Some(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.project_dir.join(path)
        })
    }

    /// Effective configuration as TOML with the API key masked.
    pub fn show(&self) -> Result<String> {
        let mut shown = self.toml.clone();
        if !shown.llm.api_key.is_empty() {
            shown.llm.api_key = "********".to_string();
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_gives_defaults() {
        let toml = DevloopToml::parse("").unwrap();
        assert_eq!(toml, DevloopToml::default());
        assert_eq!(toml.pipeline.max_attempts, 10);
        assert_eq!(toml.pipeline.split_threshold, 21);
        assert_eq!(toml.llm.timeout_secs, 300);
        assert!(toml.protocol.endpoint.is_none());
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[llm]
model = "qwen2.5-coder"

[git]
repo_path = "."
branch = "develop"
"#;
        let toml = DevloopToml::parse(content).unwrap();
        assert_eq!(toml.llm.model, "qwen2.5-coder");
        assert_eq!(toml.llm.endpoint, "http://localhost:11434/api/chat");
        assert_eq!(toml.git.branch, "develop");
        assert_eq!(toml.git.remote, "origin");
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(DevloopToml::parse("[llm\nmodel=").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("DEVLOOP_MODEL", "env-model"),
            ("DEVLOOP_MAX_ATTEMPTS", "3"),
            ("DEVLOOP_PROTOCOL_ENDPOINT", "http://target:9000/"),
            ("DEVLOOP_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        let mut toml = DevloopToml::parse("[llm]\nmodel = \"file-model\"").unwrap();
        toml.apply_env(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(toml.llm.model, "env-model");
        assert_eq!(toml.pipeline.max_attempts, 3);
        assert_eq!(toml.protocol.endpoint.as_deref(), Some("http://target:9000/"));
        assert!(toml.llm.api_key.is_empty());
    }

    #[test]
    fn test_env_invalid_number() {
        let mut toml = DevloopToml::default();
        let result = toml.apply_env(|k| (k == "DEVLOOP_MAX_ATTEMPTS").then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_everything() {
        let paths = ProjectPaths::under(PathBuf::from("/p"));
        let mut toml = DevloopToml::default();
        toml.llm.model = "file".into();
        let config = DevloopConfig::from_parts(paths, toml).with_cli(&CliOverrides {
            model: Some("cli".into()),
            max_attempts: Some(2),
            verbose: true,
            ..Default::default()
        });
        assert_eq!(config.toml.llm.model, "cli");
        assert_eq!(config.toml.pipeline.max_attempts, 2);
        assert_eq!(config.toml.logging.level, "debug");
    }

    #[test]
    fn test_protocol_endpoint_resolution() {
        let paths = ProjectPaths::under(PathBuf::from("/p"));
        let config = DevloopConfig::from_parts(paths, DevloopToml::default());
        let empty = ServerRegistry::default();
        assert_eq!(config.protocol_endpoint(&empty), DEFAULT_PROTOCOL_ENDPOINT);
        assert_eq!(config.protocol_timeout(&empty), Duration::from_secs(300));

        let mut explicit = config.clone();
        explicit.toml.protocol.endpoint = Some("http://x/".into());
        assert_eq!(explicit.protocol_endpoint(&empty), "http://x/");
    }

    #[test]
    fn test_git_repo_resolution() {
        let paths = ProjectPaths::under(PathBuf::from("/p"));
        let mut config = DevloopConfig::from_parts(paths, DevloopToml::default());
        assert_eq!(config.git_repo(), None);
        config.toml.git.repo_path = ".".into();
        assert_eq!(config.git_repo(), Some(PathBuf::from("/p/.")));
        config.toml.git.repo_path = "/repo".into();
        assert_eq!(config.git_repo(), Some(PathBuf::from("/repo")));
    }

    #[test]
    fn test_save_and_load_roundtrip_and_show_masks_key() {
        let dir = tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path()).unwrap();
        let mut toml = DevloopToml::default();
        toml.llm.api_key = "secret".into();
        toml.save(&paths.config_file).unwrap();

        let loaded = DevloopToml::load_or_default(&paths.config_file).unwrap();
        assert_eq!(loaded.llm.api_key, "secret");

        let config = DevloopConfig::from_parts(paths, loaded);
        let shown = config.show().unwrap();
        assert!(shown.contains("********"));
        assert!(!shown.contains("secret"));
        assert_eq!(config.api_key().as_deref(), Some("secret"));
    }

    #[test]
    fn test_validate_warnings() {
        assert!(DevloopToml::default().validate().is_empty());
        let mut toml = DevloopToml::default();
        toml.pipeline.max_attempts = 0;
        toml.llm.endpoint = "localhost".into();
        assert_eq!(toml.validate().len(), 2);
    }
}
