//! Chat-completion client and prompt templates for the three agents.

pub mod prompts;

pub use prompts::{Agent, PromptLibrary, PromptTemplate, RenderedPrompt, Replacements};

use crate::errors::LlmError;
use crate::util::preview;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Accepts both `{"message": {...}}` (Ollama) and
/// `{"choices": [{"message": {...}}]}` (OpenAI-compatible) bodies.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatResponse {
    fn into_content(self) -> Option<String> {
        self.message
            .or_else(|| self.choices.into_iter().next().map(|c| c.message))
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One system + user exchange; returns the model's reply text.
    async fn exec(
        &self,
        system: &str,
        user: &str,
        model: &str,
        endpoint: &str,
    ) -> Result<String, LlmError>;
}

/// [`LlmClient`] for a non-streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Transport)?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn exec(
        &self,
        system: &str,
        user: &str,
        model: &str,
        endpoint: &str,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            stream: false,
        };
        debug!(model, endpoint, prompt = %preview(user, 200), "calling model");

        let mut builder = self.client.post(endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = builder.send().await.map_err(LlmError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(LlmError::Transport)?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: preview(&body, 500),
            });
        }

        let content = serde_json::from_str::<ChatResponse>(&body)
            .ok()
            .and_then(ChatResponse::into_content)
            .ok_or(LlmError::EmptyResponse)?;
        debug!(reply = %preview(&content, 200), "model replied");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/chat", addr)
    }

    fn client() -> HttpLlmClient {
        HttpLlmClient::new(None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_response_shapes() {
        let ollama: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": "hi"}}"#).unwrap();
        assert_eq!(ollama.into_content().as_deref(), Some("hi"));

        let openai: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "yo"}}]}"#,
        )
        .unwrap();
        assert_eq!(openai.into_content().as_deref(), Some("yo"));

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.into_content(), None);
    }

    #[tokio::test]
    async fn test_exec_posts_system_and_user() {
        let router = Router::new().route(
            "/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["messages"][0]["role"], "system");
                let user = body["messages"][1]["content"].as_str().unwrap_or("").to_string();
                Json(json!({"message": {"role": "assistant", "content": format!("echo {}", user)}}))
            }),
        );
        let endpoint = serve(router).await;

        let reply = client().exec("sys", "hello", "llama3", &endpoint).await.unwrap();
        assert_eq!(reply, "echo hello");
    }

    #[tokio::test]
    async fn test_exec_reports_http_status() {
        let router = Router::new().route(
            "/chat",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let endpoint = serve(router).await;

        let err = client().exec("s", "u", "m", &endpoint).await.unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }
}
