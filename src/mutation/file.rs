use super::backup::BackupSet;
use crate::commands::{FileAction, FileCommand};
use crate::errors::MutationError;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Applies create/update file commands as one all-or-nothing batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMutator;

impl FileMutator {
    pub fn new() -> Self {
        Self
    }

    /// Apply every valid command under `root`. On the first failure every
    /// file touched so far is restored and the error is returned.
    pub fn apply(&self, commands: &[FileCommand], root: &Path) -> Result<(), MutationError> {
        if !root.is_dir() {
            return Err(MutationError::RootMissing(root.to_path_buf()));
        }

        let mut backups = BackupSet::new();
        match apply_all(commands, root, &mut backups) {
            Ok(applied) => {
                backups.commit()?;
                if applied > 0 {
                    info!(applied, "file commands applied");
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "file batch failed, rolling back");
                backups.rollback()?;
                Err(e)
            }
        }
    }
}

fn apply_all(
    commands: &[FileCommand],
    root: &Path,
    backups: &mut BackupSet,
) -> Result<usize, MutationError> {
    let mut applied = 0;
    for command in commands {
        let Some((rel, content)) = command.parts() else {
            warn!(action = ?command.action, path = ?command.path, "skipping file command without path or content");
            continue;
        };
        let target = resolve_under(root, rel)?;
        backups.protect(&target)?;

        if command.action == FileAction::Create {
            backups.ensure_parent(&target)?;
        }
        fs::write(&target, content).map_err(|e| MutationError::io(&target, e))?;
        debug!(action = ?command.action, file = %target.display(), bytes = content.len(), "wrote file");
        applied += 1;
    }
    Ok(applied)
}

/// Join `rel` onto `root`, refusing anything that would land outside it.
pub fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf, MutationError> {
    let rel_path = Path::new(rel.trim());
    let mut resolved = root.to_path_buf();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MutationError::PathEscapesRoot(rel.to_string()));
            }
        }
    }
    if resolved == root {
        return Err(MutationError::PathEscapesRoot(rel.to_string()));
    }
    Ok(resolved)
}
