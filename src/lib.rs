pub mod audit;
pub mod commands;
pub mod config;
pub mod devloop_config;
pub mod dispatch;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod mutation;
pub mod orchestrator;
pub mod project;
pub mod protocol;
pub mod task;
pub mod tracker;
pub mod util;
