//! Command taxonomy produced by the developer stage.
//!
//! ```json
//! {
//!   "fileCommands":   [{"action": "create", "path": "Assets/Scripts/Jump.cs", "content": "..."}],
//!   "methodCommands": [{"action": "add", "className": "Player", "methodSignature": "void Jump()", "methodBody": "{ ... }"}],
//!   "mcpCommands":    [{"action": "gameobject-create", "parameters": {"name": "Platform"}}]
//! }
//! ```
//!
//! Every list is optional. Individual commands keep their required fields
//! optional too: a command with a missing field is skipped at apply time
//! instead of failing the whole response at parse time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCommand {
    pub action: FileAction,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl FileCommand {
    pub fn create(path: &str, content: &str) -> Self {
        Self {
            action: FileAction::Create,
            path: Some(path.to_string()),
            content: Some(content.to_string()),
        }
    }

    pub fn update(path: &str, content: &str) -> Self {
        Self {
            action: FileAction::Update,
            path: Some(path.to_string()),
            content: Some(content.to_string()),
        }
    }

    /// Path and content when both are present and non-empty.
    pub fn parts(&self) -> Option<(&str, &str)> {
        match (self.path.as_deref(), self.content.as_deref()) {
            (Some(p), Some(c)) if !p.trim().is_empty() && !c.is_empty() => Some((p, c)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodAction {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for MethodAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodAction::Add => write!(f, "add"),
            MethodAction::Update => write!(f, "update"),
            MethodAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCommand {
    pub action: MethodAction,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub method_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_body: Option<String>,
    /// Location hint some models emit. Discovery always goes by class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl MethodCommand {
    pub fn new(action: MethodAction, class_name: &str, signature: &str, body: Option<&str>) -> Self {
        Self {
            action,
            class_name: Some(class_name.to_string()),
            method_signature: Some(signature.to_string()),
            method_body: body.map(str::to_string),
            file: None,
        }
    }

    /// Class name and signature when both are present and non-empty.
    pub fn target(&self) -> Option<(&str, &str)> {
        match (self.class_name.as_deref(), self.method_signature.as_deref()) {
            (Some(c), Some(s)) if !c.trim().is_empty() && !s.trim().is_empty() => {
                Some((c.trim(), s.trim()))
            }
            _ => None,
        }
    }

    pub fn body(&self) -> &str {
        self.method_body.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpCommand {
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl McpCommand {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

/// Everything the developer stage produced for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsData {
    #[serde(default)]
    pub file_commands: Vec<FileCommand>,
    #[serde(default)]
    pub method_commands: Vec<MethodCommand>,
    #[serde(default)]
    pub mcp_commands: Vec<McpCommand>,
}

impl CommandsData {
    pub fn is_empty(&self) -> bool {
        self.file_commands.is_empty()
            && self.method_commands.is_empty()
            && self.mcp_commands.is_empty()
    }

    pub fn total(&self) -> usize {
        self.file_commands.len() + self.method_commands.len() + self.mcp_commands.len()
    }
}
