//! Target server descriptors: `<servers_dir>/*.json`.
//!
//! ```json
//! {
//!   "active": true,
//!   "name": "unity-editor",
//!   "url": "http://localhost:8090/",
//!   "timeout": 300,
//!   "actions": [
//!     {"action": "gameobject-create", "description": "...", "parameters": {"name": "string"}}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionDescriptor {
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    #[serde(default)]
    pub active: bool,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,
    /// File the descriptor came from; not part of the JSON.
    #[serde(skip)]
    pub file_name: String,
}

/// Active server descriptors found in a directory.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<ServerDescriptor>,
}

impl ServerRegistry {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        Self {
            servers: servers.into_iter().filter(|s| s.active).collect(),
        }
    }

    /// Load every `*.json` descriptor in `dir`. A missing directory gives an
    /// empty registry; malformed or inactive files are skipped.
    pub fn load(dir: &Path) -> Self {
        let pattern = dir.join("*.json");
        let Some(pattern) = pattern.to_str() else {
            warn!(dir = %dir.display(), "server descriptor directory is not valid UTF-8");
            return Self::default();
        };
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "bad server descriptor pattern");
                return Self::default();
            }
        };

        let mut servers = Vec::new();
        for path in paths.filter_map(Result::ok) {
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<ServerDescriptor>(&c).map_err(|e| e.to_string()));
            match parsed {
                Ok(mut server) if server.active => {
                    server.file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    debug!(server = %server.name, actions = server.actions.len(), "loaded server descriptor");
                    servers.push(server);
                }
                Ok(server) => debug!(server = %server.name, "skipping inactive server"),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping malformed server descriptor"),
            }
        }
        servers.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Self { servers }
    }

    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Action list for the developer prompt.
    pub fn commands_text(&self) -> String {
        let lines: Vec<String> = self
            .servers
            .iter()
            .flat_map(|s| s.actions.iter())
            .map(|a| format!("Action: {}, Parameters: {}", a.action, a.parameter_names().join(", ")))
            .collect();
        if lines.is_empty() {
            "No MCP commands found.".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// URL of the first active server that declares one.
    pub fn endpoint(&self) -> Option<&str> {
        self.servers.iter().find_map(|s| s.url.as_deref())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.servers
            .iter()
            .find_map(|s| s.timeout)
            .map(Duration::from_secs)
    }
}
