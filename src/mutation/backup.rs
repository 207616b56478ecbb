use crate::errors::MutationError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Pre-mutation copy of one file. Lives only inside the `apply` call that
/// created it.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    /// False when the batch is about to create the file; rollback then
    /// removes it instead of copying a backup back.
    pub existed: bool,
}

/// Sibling backup location for `path`: `path + ".bak"`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Backups taken during one batch. Must end in exactly one of
/// [`BackupSet::commit`] or [`BackupSet::rollback`].
#[derive(Debug, Default)]
pub struct BackupSet {
    records: Vec<BackupRecord>,
    created_dirs: Vec<PathBuf>,
}

impl BackupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `path` aside before it is mutated. A path already backed up in
    /// this batch keeps its first backup, which holds the pre-batch content.
    /// Refuses to touch a file whose backup slot is already taken by a file
    /// this batch did not create.
    pub fn protect(&mut self, path: &Path) -> Result<(), MutationError> {
        if self.records.iter().any(|r| r.original_path == path) {
            return Ok(());
        }
        let backup_path = backup_path_for(path);
        let existed = path.is_file();
        if existed && backup_path.exists() {
            return Err(MutationError::BackupSlotTaken(backup_path));
        }
        if existed {
            fs::copy(path, &backup_path).map_err(|e| MutationError::io(&backup_path, e))?;
            debug!(file = %path.display(), "backed up");
        }
        self.records.push(BackupRecord {
            original_path: path.to_path_buf(),
            backup_path,
            existed,
        });
        Ok(())
    }

    /// Create any missing parent directories of `path`, remembering which
    /// ones this batch created so rollback can remove them again.
    pub fn ensure_parent(&mut self, path: &Path) -> Result<(), MutationError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let mut missing: Vec<PathBuf> = parent
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .map(Path::to_path_buf)
            .collect();
        fs::create_dir_all(parent).map_err(|e| MutationError::io(parent, e))?;
        missing.reverse();
        self.created_dirs.extend(missing);
        Ok(())
    }

    /// Batch succeeded: drop every backup file.
    pub fn commit(self) -> Result<(), MutationError> {
        for record in &self.records {
            if record.backup_path.exists() {
                fs::remove_file(&record.backup_path)
                    .map_err(|e| MutationError::io(&record.backup_path, e))?;
            }
        }
        Ok(())
    }

    /// Batch failed: put every protected file back the way it was, newest
    /// first, and remove the backups. Keeps going past individual failures so
    /// as much as possible is restored; the first failure is returned.
    pub fn rollback(self) -> Result<(), MutationError> {
        let mut first_err = None;
        for record in self.records.iter().rev() {
            if let Err(e) = restore(record) {
                error!(file = %record.original_path.display(), error = %e, "rollback step failed");
                first_err.get_or_insert(MutationError::RollbackFailed {
                    path: record.original_path.clone(),
                    source: e,
                });
            }
        }
        for dir in self.created_dirs.iter().rev() {
            if let Err(e) = fs::remove_dir(dir) {
                debug!(dir = %dir.display(), error = %e, "left created directory in place");
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn restore(record: &BackupRecord) -> std::io::Result<()> {
    if record.existed {
        if record.backup_path.exists() {
            fs::copy(&record.backup_path, &record.original_path)?;
            fs::remove_file(&record.backup_path)?;
        }
    } else if record.original_path.is_file() {
        fs::remove_file(&record.original_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backup_path_is_sibling() {
        assert_eq!(
            backup_path_for(Path::new("/p/src/a.cs")),
            PathBuf::from("/p/src/a.cs.bak")
        );
    }

    #[test]
    fn test_commit_removes_backups() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "old").unwrap();

        let mut set = BackupSet::new();
        set.protect(&file).unwrap();
        assert!(backup_path_for(&file).exists());
        fs::write(&file, "new").unwrap();
        set.commit().unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
        assert!(!backup_path_for(&file).exists());
    }

    #[test]
    fn test_rollback_restores_and_removes_created() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("a.txt");
        let created = dir.path().join("b.txt");
        fs::write(&existing, "old").unwrap();

        let mut set = BackupSet::new();
        set.protect(&existing).unwrap();
        set.protect(&created).unwrap();
        fs::write(&existing, "new").unwrap();
        fs::write(&created, "fresh").unwrap();
        set.rollback().unwrap();

        assert_eq!(fs::read_to_string(&existing).unwrap(), "old");
        assert!(!created.exists());
        assert!(!backup_path_for(&existing).exists());
    }

    #[test]
    fn test_rollback_removes_created_directories() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("new/nested/c.txt");

        let mut set = BackupSet::new();
        set.protect(&file).unwrap();
        set.ensure_parent(&file).unwrap();
        fs::write(&file, "x").unwrap();
        set.rollback().unwrap();

        assert!(!dir.path().join("new").exists());
    }

    #[test]
    fn test_second_protect_keeps_pre_batch_copy() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "v0").unwrap();

        let mut set = BackupSet::new();
        set.protect(&file).unwrap();
        fs::write(&file, "v1").unwrap();
        set.protect(&file).unwrap();
        fs::write(&file, "v2").unwrap();
        assert_eq!(set.records.len(), 1);
        set.rollback().unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "v0");
    }

    #[test]
    fn test_existing_backup_file_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let user_bak = backup_path_for(&file);
        fs::write(&file, "current").unwrap();
        fs::write(&user_bak, "kept by the user").unwrap();

        let mut set = BackupSet::new();
        let err = set.protect(&file).unwrap_err();
        assert!(matches!(err, MutationError::BackupSlotTaken(p) if p == user_bak));
        assert!(set.records.is_empty());
        set.rollback().unwrap();

        assert_eq!(fs::read_to_string(&user_bak).unwrap(), "kept by the user");
        assert_eq!(fs::read_to_string(&file).unwrap(), "current");
    }
}
