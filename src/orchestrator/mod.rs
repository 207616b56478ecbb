//! Pipeline stages: agents, per-task verification and the run driver.

pub mod agents;
pub mod lock;
pub mod pipeline;
pub mod verify;

pub use agents::{Agents, Parsed};
pub use lock::RunLock;
pub use pipeline::{Pipeline, PipelineSettings, RunSummary, TaskStatus, TaskSummary};
pub use verify::{
    Corrector, DEFAULT_MAX_ATTEMPTS, VcsTarget, VerificationLoop, VerificationReport,
    VerifyOutcome, VerifyState,
};
