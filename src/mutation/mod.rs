//! Transactional mutators for project files.
//!
//! Both mutators copy each file aside before touching it and either drop the
//! copies (batch succeeded) or copy them back (batch failed) before
//! returning, so callers never see a half-applied batch or a stray `.bak`.

pub mod backup;
pub mod editor;
pub mod file;
pub mod method;

pub use backup::{BackupRecord, BackupSet, backup_path_for};
pub use editor::{BraceEditor, EditOutcome, SourceEditor};
pub use file::FileMutator;
pub use method::{MethodMutator, find_class_files};
