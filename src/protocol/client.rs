use super::{ERROR_MARKER, ProtocolClient, ProtocolRequest, extract_response};
use crate::errors::ProtocolError;
use crate::util::preview;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// [`ProtocolClient`] over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpProtocolClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProtocolClient {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build protocol HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ProtocolClient for HttpProtocolClient {
    async fn send(
        &self,
        action: &str,
        parameters: &Map<String, Value>,
    ) -> Result<String, ProtocolError> {
        let request = ProtocolRequest {
            action: action.to_string(),
            parameters: parameters.clone(),
        };
        debug!(action, endpoint = %self.endpoint, "sending protocol action");

        let transport = |source| ProtocolError::Transport {
            action: action.to_string(),
            source,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(ProtocolError::Status {
                action: action.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let body = resp.text().await.map_err(transport)?;
        let text = extract_response(&body);
        debug!(action, response = %preview(&text, 200), "protocol response");

        if text.contains(ERROR_MARKER) {
            return Err(ProtocolError::Logical {
                action: action.to_string(),
                message: text,
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::McpCommand;
    use crate::protocol::mock::{MockTarget, spawn};

    async fn client_for(target: MockTarget) -> HttpProtocolClient {
        let addr = spawn(target).await.unwrap();
        HttpProtocolClient::new(&format!("http://{}/", addr), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_send_returns_response_field() {
        let client = client_for(MockTarget::default()).await;
        let out = client.send("start", &Map::new()).await.unwrap();
        assert_eq!(out, "Successful");
    }

    #[tokio::test]
    async fn test_error_marker_is_logical_failure() {
        let client = client_for(MockTarget::default()).await;
        let err = client.send("explode", &Map::new()).await.unwrap_err();
        assert!(err.is_logical());
        assert!(err.to_string().contains("unknown action explode"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind then drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client =
            HttpProtocolClient::new(&format!("http://127.0.0.1:{}/", port), Duration::from_secs(2))
                .unwrap();
        let err = client.send("start", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_batch_over_http() {
        let target = MockTarget::with_logs(vec!["Player spawned".into()]);
        let client = client_for(target).await;
        let out = client
            .send_batch(&[
                McpCommand::new("start"),
                McpCommand::new("nope"),
                McpCommand::new("get-log"),
            ])
            .await;
        assert_eq!(out, "Successful\nPlayer spawned");
    }
}
