//! Scripted stand-in for a target application's control endpoint.
//!
//! `start` answers "Successful", `get-status` answers "running" and each
//! `get-log` hands out the next scripted log; once the script runs out the
//! last entry repeats. Anything else is answered with an `Error:` line.

use super::{ProtocolRequest, ProtocolResponse};
use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, routing::post};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Default)]
struct Script {
    logs: Vec<String>,
    cursor: usize,
    received: Vec<String>,
}

/// Shared, cloneable handle to the scripted target.
#[derive(Debug, Clone, Default)]
pub struct MockTarget {
    script: Arc<Mutex<Script>>,
}

impl MockTarget {
    pub fn with_logs(logs: Vec<String>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                logs,
                ..Default::default()
            })),
        }
    }

    /// Logs from a file, one log per blank-line separated block.
    pub fn from_log_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read log script {}", path.display()))?;
        Ok(Self::with_logs(split_blocks(&content)))
    }

    /// Actions received so far, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.received.clone())
            .unwrap_or_default()
    }

    fn answer(&self, action: &str) -> String {
        let Ok(mut script) = self.script.lock() else {
            return "Error: mock target state poisoned".to_string();
        };
        script.received.push(action.to_string());
        match action {
            "start" => "Successful".to_string(),
            "get-status" => "running".to_string(),
            "get-log" => {
                let Some(last) = script.logs.len().checked_sub(1) else {
                    return String::new();
                };
                let idx = script.cursor.min(last);
                script.cursor += 1;
                script.logs[idx].clone()
            }
            other => format!("Error: unknown action {}", other),
        }
    }
}

fn split_blocks(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

async fn handle(
    State(target): State<MockTarget>,
    Json(request): Json<ProtocolRequest>,
) -> Json<ProtocolResponse> {
    let response = target.answer(&request.action);
    Json(ProtocolResponse {
        action: request.action,
        response: Value::String(response),
    })
}

pub fn build_router(target: MockTarget) -> Router {
    Router::new()
        .route("/", post(handle))
        .layer(TraceLayer::new_for_http())
        .with_state(target)
}

/// Serve on an ephemeral local port in the background; returns the address.
pub async fn spawn(target: MockTarget) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind mock target")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, build_router(target)).await;
    });
    Ok(addr)
}

/// Serve in the foreground until Ctrl+C.
pub async fn serve(target: MockTarget, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "mock target listening");
    println!("Mock target running at http://{}/", local_addr);

    axum::serve(listener, build_router(target))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Mock target server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn post_action(app: Router, action: &str) -> ProtocolResponse {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"action": action, "parameters": {}}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_status() {
        let target = MockTarget::default();
        let resp = post_action(build_router(target.clone()), "start").await;
        assert_eq!(resp.action, "start");
        assert_eq!(resp.response, "Successful");
        let resp = post_action(build_router(target.clone()), "get-status").await;
        assert_eq!(resp.response, "running");
        assert_eq!(target.received(), vec!["start", "get-status"]);
    }

    #[tokio::test]
    async fn test_get_log_steps_through_script_then_repeats() {
        let target = MockTarget::with_logs(vec!["Error: one".into(), "clean".into()]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let resp = post_action(build_router(target.clone()), "get-log").await;
            seen.push(resp.response.as_str().unwrap().to_string());
        }
        assert_eq!(seen, vec!["Error: one", "clean", "clean"]);
    }

    #[tokio::test]
    async fn test_empty_script_yields_empty_log() {
        let resp = post_action(build_router(MockTarget::default()), "get-log").await;
        assert_eq!(resp.response, "");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let resp = post_action(build_router(MockTarget::default()), "fly").await;
        assert_eq!(resp.response, "Error: unknown action fly");
    }

    #[test]
    fn test_log_file_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.txt");
        std::fs::write(&path, "NullReferenceException\nat Foo\n\n\nAll good\n").unwrap();
        let target = MockTarget::from_log_file(&path).unwrap();
        assert_eq!(target.answer("get-log"), "NullReferenceException\nat Foo");
        assert_eq!(target.answer("get-log"), "All good");
    }
}
