use anyhow::{Context, Result};
use git2::{FetchOptions, Repository, build::RepoBuilder};
use std::path::{Path, PathBuf};

/// Clone a repository, optionally checking out a specific branch
pub fn clone_repo(url: &str, target: &Path, branch: Option<&str>) -> Result<Repository> {
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(git2::RemoteCallbacks::new());

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options);

    if let Some(branch_name) = branch {
        builder.branch(branch_name);
    }

    builder
        .clone(url, target)
        .with_context(|| format!("Failed to clone {} into {}", url, target.display()))
}

/// Fetch the current branch from origin and hard-reset onto it
pub fn fetch_and_reset(repo: &Repository) -> Result<()> {
    let head = repo.head().context("Failed to get HEAD reference")?;
    let branch = head
        .shorthand()
        .ok_or_else(|| anyhow::anyhow!("HEAD is detached"))?
        .to_string();

    let mut remote = repo
        .find_remote("origin")
        .context("Failed to find origin remote")?;
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(git2::RemoteCallbacks::new());
    remote
        .fetch(&[branch.as_str()], Some(&mut fetch_options), None)
        .with_context(|| format!("Failed to fetch branch {branch}"))?;

    let remote_ref = repo
        .find_reference(&format!("refs/remotes/origin/{branch}"))
        .context("Failed to find remote branch reference")?;
    let commit = remote_ref
        .peel_to_commit()
        .context("Failed to peel remote branch to commit")?;

    repo.reset(commit.as_object(), git2::ResetType::Hard, None)
        .context("Failed to reset to remote commit")?;

    Ok(())
}

/// Make `target` an up-to-date checkout of `url`.
///
/// An existing checkout that cannot be updated is moved aside to
/// `<target>.bak-<unix_ts>` and replaced by a fresh clone.
pub fn sync_repo(url: &str, target: &Path, branch: Option<&str>) -> Result<SyncResult> {
    if !target.exists() {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        clone_repo(url, target, branch)?;
        return Ok(SyncResult::Cloned);
    }

    let updated = Repository::open(target)
        .context("Existing directory is not a git repository")
        .and_then(|repo| fetch_and_reset(&repo));

    match updated {
        Ok(()) => Ok(SyncResult::Updated),
        Err(e) => {
            let backup = PathBuf::from(format!(
                "{}.bak-{}",
                target.display(),
                chrono::Utc::now().timestamp()
            ));
            std::fs::rename(target, &backup).with_context(|| {
                format!("moving {} aside to {}", target.display(), backup.display())
            })?;
            clone_repo(url, target, branch)?;
            Ok(SyncResult::Recloned {
                backup,
                reason: format!("{e:#}"),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    Cloned,
    Updated,
    Recloned { backup: PathBuf, reason: String },
}
