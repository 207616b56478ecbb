//! Fans one developer response out to the file mutator, the method mutator
//! and the protocol client.
//!
//! The three kinds run in a fixed order (files, methods, protocol) and are
//! independent: a failure in one is logged and recorded, and the next kind
//! still runs.

use crate::commands::CommandsData;
use crate::mutation::{FileMutator, MethodMutator};
use crate::protocol::ProtocolClient;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    File,
    Method,
    Protocol,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::File => write!(f, "file"),
            CommandKind::Method => write!(f, "method"),
            CommandKind::Protocol => write!(f, "protocol"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KindOutcome {
    /// No commands of this kind.
    Skipped,
    Applied { count: usize },
    Failed { count: usize, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<(CommandKind, KindOutcome)>,
    /// Concatenated results of the protocol commands that succeeded.
    pub protocol_output: String,
}

impl DispatchReport {
    pub fn outcome(&self, kind: CommandKind) -> Option<&KindOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, KindOutcome::Failed { .. }))
    }
}

/// One command kind's way of applying its share of a [`CommandsData`].
#[async_trait]
pub trait CommandApplier: Send + Sync {
    fn kind(&self) -> CommandKind;

    fn count(&self, commands: &CommandsData) -> usize;

    /// Apply this kind's commands. Returns any textual output.
    async fn apply(&self, commands: &CommandsData, root: &Path) -> anyhow::Result<String>;
}

pub struct FileApplier(pub FileMutator);

#[async_trait]
impl CommandApplier for FileApplier {
    fn kind(&self) -> CommandKind {
        CommandKind::File
    }

    fn count(&self, commands: &CommandsData) -> usize {
        commands.file_commands.len()
    }

    async fn apply(&self, commands: &CommandsData, root: &Path) -> anyhow::Result<String> {
        self.0.apply(&commands.file_commands, root)?;
        Ok(String::new())
    }
}

pub struct MethodApplier(pub MethodMutator);

#[async_trait]
impl CommandApplier for MethodApplier {
    fn kind(&self) -> CommandKind {
        CommandKind::Method
    }

    fn count(&self, commands: &CommandsData) -> usize {
        commands.method_commands.len()
    }

    async fn apply(&self, commands: &CommandsData, root: &Path) -> anyhow::Result<String> {
        self.0.apply(&commands.method_commands, root)?;
        Ok(String::new())
    }
}

pub struct ProtocolApplier(pub Arc<dyn ProtocolClient>);

#[async_trait]
impl CommandApplier for ProtocolApplier {
    fn kind(&self) -> CommandKind {
        CommandKind::Protocol
    }

    fn count(&self, commands: &CommandsData) -> usize {
        commands.mcp_commands.len()
    }

    async fn apply(&self, commands: &CommandsData, _root: &Path) -> anyhow::Result<String> {
        Ok(self.0.send_batch(&commands.mcp_commands).await)
    }
}

pub struct MutationDispatcher {
    appliers: [Box<dyn CommandApplier>; 3],
}

impl MutationDispatcher {
    pub fn new(files: FileMutator, methods: MethodMutator, protocol: Arc<dyn ProtocolClient>) -> Self {
        Self {
            appliers: [
                Box::new(FileApplier(files)),
                Box::new(MethodApplier(methods)),
                Box::new(ProtocolApplier(protocol)),
            ],
        }
    }

    /// Dispatcher with the default mutators over `protocol`.
    pub fn with_protocol(protocol: Arc<dyn ProtocolClient>) -> Self {
        Self::new(FileMutator::new(), MethodMutator::default(), protocol)
    }

    pub async fn dispatch(&self, commands: &CommandsData, root: &Path) -> DispatchReport {
        let mut outcomes = Vec::with_capacity(self.appliers.len());
        let mut protocol_output = String::new();

        for applier in &self.appliers {
            let kind = applier.kind();
            let count = applier.count(commands);
            if count == 0 {
                outcomes.push((kind, KindOutcome::Skipped));
                continue;
            }
            match applier.apply(commands, root).await {
                Ok(output) => {
                    info!(%kind, count, "commands dispatched");
                    if kind == CommandKind::Protocol {
                        protocol_output = output;
                    }
                    outcomes.push((kind, KindOutcome::Applied { count }));
                }
                Err(e) => {
                    error!(%kind, count, error = %e, "command kind failed");
                    outcomes.push((
                        kind,
                        KindOutcome::Failed {
                            count,
                            error: e.to_string(),
                        },
                    ));
                }
            }
        }

        DispatchReport {
            outcomes,
            protocol_output,
        }
    }
}
