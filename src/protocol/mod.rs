//! Command protocol: named actions sent to a running target application.
//!
//! Wire format, one HTTP POST per action:
//!
//! ```text
//! -> {"action": "get-log", "parameters": {}}
//! <- {"action": "get-log", "response": "..."}
//! ```
//!
//! A response whose text contains `Error:` is the target refusing the action.
//! That is reported as [`ProtocolError::Logical`], separate from the channel
//! itself failing. Nothing here retries.

pub mod client;
pub mod mock;
pub mod servers;

pub use client::HttpProtocolClient;
pub use servers::{ActionDescriptor, ServerDescriptor, ServerRegistry};

use crate::commands::McpCommand;
use crate::errors::ProtocolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Marker a target puts in its response text when an action failed.
pub const ERROR_MARKER: &str = "Error:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRequest {
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResponse {
    #[serde(default)]
    pub action: String,
    pub response: Value,
}

/// Response text from a raw body: the `response` field when the body has the
/// wire shape, the body itself otherwise.
pub fn extract_response(body: &str) -> String {
    match serde_json::from_str::<ProtocolResponse>(body) {
        Ok(ProtocolResponse {
            response: Value::String(text),
            ..
        }) => text,
        Ok(ProtocolResponse { response, .. }) => response.to_string(),
        Err(_) => body.to_string(),
    }
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Send one action and return its response text.
    async fn send(
        &self,
        action: &str,
        parameters: &Map<String, Value>,
    ) -> Result<String, ProtocolError>;

    /// Send each command in order and concatenate the successful results,
    /// one per line. Failed commands are logged and left out.
    async fn send_batch(&self, commands: &[McpCommand]) -> String {
        let mut results = Vec::new();
        for command in commands {
            match self.send(&command.action, &command.parameters).await {
                Ok(text) => results.push(text),
                Err(e) if e.is_logical() => {
                    warn!(action = %command.action, error = %e, "target rejected action");
                }
                Err(e) => {
                    warn!(action = %command.action, error = %e, "protocol transport failure");
                }
            }
        }
        results.join("\n")
    }
}
