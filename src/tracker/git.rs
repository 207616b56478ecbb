use super::{CommitOutcome, CommitRequest, VersionControl};
use crate::config::STATE_DIR;
use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{IndexAddOption, Repository, Signature};
use std::path::Path;
use tracing::{debug, info, warn};

/// [`VersionControl`] over git2, with `git push` run as a subprocess so the
/// user's credential helpers apply.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitTracker;

impl GitTracker {
    pub fn new() -> Self {
        Self
    }

    fn open_or_init(path: &Path) -> Result<Repository> {
        match Repository::open(path) {
            Ok(repo) => Ok(repo),
            Err(_) => {
                info!(path = %path.display(), "no git repository, initializing");
                Repository::init(path)
                    .with_context(|| format!("Failed to init git repository at {}", path.display()))
            }
        }
    }

    /// Stage everything and commit unless the tree is unchanged.
    fn commit_all(repo: &Repository, message: &str) -> Result<Option<String>> {
        let mut index = repo.index()?;
        // Run state lives next to the project but is never committed.
        let mut skip_state = |path: &Path, _spec: &[u8]| -> i32 {
            if path.starts_with(STATE_DIR) { 1 } else { 0 }
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::DEFAULT,
            Some(&mut skip_state as &mut git2::IndexMatchedPath<'_>),
        )?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = head_commit(repo);
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            return Ok(None);
        }
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("devloop", "devloop@localhost"))?;

        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .context("Failed to create commit")?;
        Ok(Some(oid.to_string()))
    }

    fn reset_to_head(path: &Path) -> Result<()> {
        let repo = Self::open_or_init(path)?;
        let Some(head) = head_commit(&repo) else {
            warn!(path = %path.display(), "repository has no commits, nothing to reset to");
            return Ok(());
        };
        repo.reset(head.as_object(), git2::ResetType::Hard, None)
            .context("git reset --hard failed")?;
        info!(sha = %head.id(), "working tree reset");
        Ok(())
    }

    /// Head SHA of the repository at `path`, if it has commits.
    pub fn head_sha(path: &Path) -> Option<String> {
        let repo = Repository::open(path).ok()?;
        head_commit(&repo).map(|c| c.id().to_string())
    }
}

/// HEAD commit, `None` on an unborn branch.
fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}

async fn push(request: &CommitRequest) -> Result<()> {
    let refspec = format!("HEAD:{}", request.branch_name);
    let output = tokio::process::Command::new("git")
        .args(["push", &request.remote_name, &refspec])
        .current_dir(&request.repo_path)
        .output()
        .await
        .context("Failed to run git push")?;
    if !output.status.success() {
        anyhow::bail!(
            "git push {} {} failed: {}",
            request.remote_name,
            refspec,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[async_trait]
impl VersionControl for GitTracker {
    async fn commit_and_push(&self, request: &CommitRequest) -> Result<CommitOutcome> {
        let path = request.repo_path.clone();
        let message = request.commit_message.clone();
        let remote = request.remote_name.clone();
        let (sha, has_remote) = tokio::task::spawn_blocking(move || -> Result<_> {
            let repo = Self::open_or_init(&path)?;
            let sha = Self::commit_all(&repo, &message)?;
            let has_remote = repo.find_remote(&remote).is_ok();
            Ok((sha, has_remote))
        })
        .await
        .context("Commit task panicked")??;

        let Some(sha) = sha else {
            info!("working tree unchanged, nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        };
        info!(%sha, message = %request.commit_message, "committed");

        if !has_remote {
            debug!(remote = %request.remote_name, "remote not configured, skipping push");
            return Ok(CommitOutcome::Committed { sha, pushed: false });
        }
        push(request).await?;
        info!(remote = %request.remote_name, branch = %request.branch_name, "pushed");
        Ok(CommitOutcome::Committed { sha, pushed: true })
    }

    async fn reset_hard(&self, repo_path: &Path) -> Result<()> {
        let path = repo_path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::reset_to_head(&path))
            .await
            .context("Reset task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        dir
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn test_commit_then_nothing_to_commit() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let request = CommitRequest::new(dir.path(), "Add jump");

        let first = GitTracker::new().commit_and_push(&request).await.unwrap();
        let CommitOutcome::Committed { sha, pushed } = first else {
            panic!("Expected a commit");
        };
        assert_eq!(sha.len(), 40);
        assert!(!pushed);
        assert_eq!(GitTracker::head_sha(dir.path()), Some(sha));

        let second = GitTracker::new().commit_and_push(&request).await.unwrap();
        assert_eq!(second, CommitOutcome::NothingToCommit);
    }

    #[tokio::test]
    async fn test_commit_initializes_missing_repo() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let outcome = GitTracker::new()
            .commit_and_push(&CommitRequest::new(dir.path(), "init"))
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
        assert!(dir.path().join(".git").is_dir());
    }

    #[tokio::test]
    async fn test_state_dir_is_not_committed() {
        let dir = setup_repo();
        fs::create_dir_all(dir.path().join(".devloop")).unwrap();
        fs::write(dir.path().join(".devloop/audit.db"), "db").unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        GitTracker::new()
            .commit_and_push(&CommitRequest::new(dir.path(), "work"))
            .await
            .unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("a.txt").is_some());
        assert!(tree.get_name(".devloop").is_none());
    }

    #[tokio::test]
    async fn test_commit_records_deletions() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let tracker = GitTracker::new();
        tracker
            .commit_and_push(&CommitRequest::new(dir.path(), "one"))
            .await
            .unwrap();
        fs::remove_file(dir.path().join("a.txt")).unwrap();

        let outcome = tracker
            .commit_and_push(&CommitRequest::new(dir.path(), "two"))
            .await
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
    }

    #[tokio::test]
    async fn test_reset_hard_restores_tracked_files() {
        let dir = setup_repo();
        let file = dir.path().join("Player.cs");
        fs::write(&file, "class Player {}").unwrap();
        let tracker = GitTracker::new();
        tracker
            .commit_and_push(&CommitRequest::new(dir.path(), "base"))
            .await
            .unwrap();

        fs::write(&file, "class Player { broken").unwrap();
        tracker.reset_hard(dir.path()).await.unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "class Player {}");
    }

    #[tokio::test]
    async fn test_reset_on_unborn_branch_is_ok() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        GitTracker::new().reset_hard(dir.path()).await.unwrap();
        assert!(dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_push_to_local_bare_remote() {
        if !git_available() {
            return;
        }
        let remote_dir = tempdir().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let dir = setup_repo();
        {
            let repo = Repository::open(dir.path()).unwrap();
            repo.remote("origin", remote_dir.path().to_str().unwrap())
                .unwrap();
        }
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let outcome = GitTracker::new()
            .commit_and_push(&CommitRequest::new(dir.path(), "publish"))
            .await
            .unwrap();

        let CommitOutcome::Committed { sha, pushed } = outcome else {
            panic!("Expected a commit");
        };
        assert!(pushed);
        let bare = Repository::open_bare(remote_dir.path()).unwrap();
        let pushed_sha = bare.refname_to_id("refs/heads/main").unwrap();
        assert_eq!(pushed_sha.to_string(), sha);
    }
}
