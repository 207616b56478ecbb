use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory holding all run state, relative to the project root.
pub const STATE_DIR: &str = ".devloop";

/// Every path a pipeline stage touches, resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPaths {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    /// Per-project prompt template overrides.
    pub prompts_dir: PathBuf,
    /// Protocol server descriptors.
    pub servers_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_file: PathBuf,
    pub lock_file: PathBuf,
    pub config_file: PathBuf,
}

impl ProjectPaths {
    /// Resolve paths under `project_dir`, which must exist.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let project_dir = project_dir.canonicalize().with_context(|| {
            format!(
                "Failed to resolve project directory: {}",
                project_dir.display()
            )
        })?;
        Ok(Self::under(project_dir))
    }

    /// Resolve paths without touching the file system.
    pub fn under(project_dir: PathBuf) -> Self {
        let state_dir = project_dir.join(STATE_DIR);
        Self {
            prompts_dir: state_dir.join("prompts"),
            servers_dir: state_dir.join("mcp-servers"),
            log_dir: state_dir.join("logs"),
            db_file: state_dir.join("devloop.db"),
            lock_file: state_dir.join("run.lock"),
            config_file: state_dir.join("devloop.toml"),
            state_dir,
            project_dir,
        }
    }

    /// Point server descriptors somewhere else; relative paths are taken
    /// from the project root.
    pub fn with_servers_dir(mut self, dir: &Path) -> Self {
        self.servers_dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.project_dir.join(dir)
        };
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.state_dir,
            &self.prompts_dir,
            &self.servers_dir,
            &self.log_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
