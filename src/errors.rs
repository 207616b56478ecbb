//! Typed error hierarchy for devloop.
//!
//! Four enums cover the subsystems that can fail on their own terms:
//! - `MutationError`: file and method mutators (rolled back before returning)
//! - `ProtocolError`: command protocol client
//! - `LlmError`: model endpoint calls
//! - `PipelineError`: setup failures that stop a run before it starts

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the transactional mutators. By the time one of these reaches a
/// caller, the batch that produced it has already been rolled back.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Project root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Command path escapes the project root: {0}")]
    PathEscapesRoot(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup location already in use: {0}")]
    BackupSlotTaken(PathBuf),

    #[error("Rollback failed for {path}: {source}")]
    RollbackFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MutationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a single protocol command.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Transport failure for action '{action}': {source}")]
    Transport {
        action: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Action '{action}' returned HTTP {status}")]
    Status { action: String, status: u16 },

    #[error("Action '{action}' reported an error: {message}")]
    Logical { action: String, message: String },
}

impl ProtocolError {
    /// Logical failures come from the target itself; everything else is the
    /// channel failing.
    pub fn is_logical(&self) -> bool {
        matches!(self, Self::Logical { .. })
    }
}

/// Errors from the model endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Model endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model returned no content")]
    EmptyResponse,

    #[error("Prompt template '{0}' not found")]
    TemplateMissing(String),
}

/// Errors that prevent a pipeline run from starting.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Another run holds the project lock at {0}")]
    LockHeld(PathBuf),

    #[error("Failed to open audit store at {path}: {source}")]
    AuditStore {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_error_io_carries_path() {
        let err = MutationError::io(
            "/project/src/a.cs",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        match &err {
            MutationError::Io { path, source } => {
                assert_eq!(path, &PathBuf::from("/project/src/a.cs"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io variant"),
        }
        assert!(err.to_string().contains("/project/src/a.cs"));
    }

    #[test]
    fn protocol_logical_error_is_distinguished() {
        let err = ProtocolError::Logical {
            action: "get-log".into(),
            message: "Error: not running".into(),
        };
        assert!(err.is_logical());
        let status = ProtocolError::Status {
            action: "start".into(),
            status: 500,
        };
        assert!(!status.is_logical());
        assert!(status.to_string().contains("500"));
    }

    #[test]
    fn pipeline_error_converts_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("bad config").into();
        assert!(matches!(err, PipelineError::Other(_)));
        assert_eq!(err.to_string(), "bad config");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&MutationError::RootMissing(PathBuf::from("/x")));
        assert_std_error(&LlmError::EmptyResponse);
        assert_std_error(&PipelineError::LockHeld(PathBuf::from("/x/.devloop/run.lock")));
    }
}
