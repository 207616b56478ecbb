//! Scripted target: `devloop serve-mock`.

use anyhow::Result;
use devloop::protocol::mock::{MockTarget, serve};
use std::path::Path;

pub async fn cmd_serve_mock(addr: &str, logs: Option<&Path>) -> Result<()> {
    let target = match logs {
        Some(path) => MockTarget::from_log_file(path)?,
        None => MockTarget::default(),
    };
    serve(target, addr).await
}
