use super::backup::BackupSet;
use super::editor::{BraceEditor, EditOutcome, SourceEditor};
use crate::commands::{MethodAction, MethodCommand};
use crate::errors::MutationError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Directories never searched for classes.
const SKIPPED_DIRS: &[&str] = &[".git", ".devloop", "node_modules", "target"];

/// Applies add/update/delete method commands to every file declaring the
/// named class.
///
/// Each command is its own transaction: if editing any file in its match set
/// fails, all files of that command are restored and the error is returned.
/// Commands earlier in the slice stay applied.
#[derive(Clone)]
pub struct MethodMutator {
    editor: Arc<dyn SourceEditor>,
}

impl Default for MethodMutator {
    fn default() -> Self {
        Self::new(Arc::new(BraceEditor::new()))
    }
}

impl std::fmt::Debug for MethodMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodMutator").finish_non_exhaustive()
    }
}

impl MethodMutator {
    pub fn new(editor: Arc<dyn SourceEditor>) -> Self {
        Self { editor }
    }

    pub fn apply(&self, commands: &[MethodCommand], root: &Path) -> Result<(), MutationError> {
        if !root.is_dir() {
            return Err(MutationError::RootMissing(root.to_path_buf()));
        }
        for command in commands {
            let Some((class_name, signature)) = command.target() else {
                error!(action = %command.action, "method command missing className or methodSignature, skipping");
                continue;
            };
            let files = find_class_files(root, class_name);
            if files.is_empty() {
                warn!(class = class_name, "no file declares class, skipping method command");
                continue;
            }
            self.apply_one(command, class_name, signature, &files)?;
        }
        Ok(())
    }

    fn apply_one(
        &self,
        command: &MethodCommand,
        class_name: &str,
        signature: &str,
        files: &[PathBuf],
    ) -> Result<(), MutationError> {
        let mut backups = BackupSet::new();
        for file in files {
            if let Err(e) = self.edit_file(command, class_name, signature, file, &mut backups) {
                error!(class = class_name, signature, error = %e, "method command failed, rolling back");
                backups.rollback()?;
                return Err(e);
            }
        }
        backups.commit()
    }

    fn edit_file(
        &self,
        command: &MethodCommand,
        class_name: &str,
        signature: &str,
        file: &Path,
        backups: &mut BackupSet,
    ) -> Result<(), MutationError> {
        backups.protect(file)?;
        let source = fs::read_to_string(file).map_err(|e| MutationError::io(file, e))?;
        let outcome = match command.action {
            MethodAction::Add => {
                self.editor
                    .add_method(&source, class_name, signature, command.body())
            }
            MethodAction::Update => {
                self.editor
                    .update_method(&source, class_name, signature, command.body())
            }
            MethodAction::Delete => self.editor.delete_method(&source, class_name, signature),
        };
        match outcome {
            EditOutcome::Changed(updated) => {
                fs::write(file, updated).map_err(|e| MutationError::io(file, e))?;
                info!(action = %command.action, class = class_name, signature, file = %file.display(), "method edited");
            }
            EditOutcome::Unchanged(reason) => {
                debug!(action = %command.action, signature, file = %file.display(), reason, "method left unchanged");
            }
        }
        Ok(())
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        entry.depth() > 0 && SKIPPED_DIRS.contains(&name.as_ref())
    } else {
        name.ends_with(".bak")
    }
}

/// Every text file under `root` whose content contains `class <name>`.
/// Substring match, so `class Player` also hits `class PlayerController`.
pub fn find_class_files(root: &Path, class_name: &str) -> Vec<PathBuf> {
    let needle = format!("class {}", class_name);
    let mut matches: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| match fs::read_to_string(e.path()) {
            Ok(content) => content.contains(&needle),
            Err(err) => {
                debug!(file = %e.path().display(), error = %err, "skipping unreadable file");
                false
            }
        })
        .map(|e| e.into_path())
        .collect();
    matches.sort();
    matches
}
