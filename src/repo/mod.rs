//! Foreign apt repositories: signing key, sources entry and a low-priority pin.
//!
//! Registration is transactional per run. Every file this run created or
//! replaced is remembered in a [`Registration`] so that a failed metadata
//! refresh can put `/etc/apt` back the way it was.

pub mod commands;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::common::{CommandExecutor, http};
use crate::config::RepositoryConfig;
use crate::ui::prelude::*;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository '{0}' is not configured")]
    Unknown(String),
    #[error("failed to fetch signing key for '{name}' from {url}: {reason}")]
    KeyFetch {
        name: String,
        url: String,
        reason: String,
    },
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Locations of apt's configuration below a filesystem root.
#[derive(Debug, Clone)]
pub struct AptLayout {
    root: PathBuf,
}

const KEYRINGS: &str = "etc/apt/keyrings";
const SOURCES: &str = "etc/apt/sources.list.d";
const PREFERENCES: &str = "etc/apt/preferences.d";

impl AptLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn system() -> Self {
        Self::new("/")
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        self.root.join(KEYRINGS).join(format!("{name}.asc"))
    }

    pub fn list_path(&self, name: &str) -> PathBuf {
        self.root.join(SOURCES).join(format!("{name}.list"))
    }

    pub fn pin_path(&self, name: &str) -> PathBuf {
        self.root.join(PREFERENCES).join(format!("{name}-pin"))
    }

    /// Key location as apt sees it, independent of `root`
    fn signed_by(name: &str) -> PathBuf {
        Path::new("/").join(KEYRINGS).join(format!("{name}.asc"))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.list_path(name).exists()
    }
}

/// `deb [signed-by=…] <uri> <suite> <components…>`
pub fn sources_entry(repo: &RepositoryConfig) -> String {
    let options = if repo.key_url.is_some() {
        format!("[signed-by={}] ", AptLayout::signed_by(&repo.name).display())
    } else {
        String::new()
    };
    format!(
        "deb {}{} {} {}\n",
        options,
        repo.uri,
        repo.suite,
        repo.components.join(" ")
    )
}

/// Pin the whole suite below the default priority so it is only used with `-t`
pub fn pin_entry(repo: &RepositoryConfig) -> String {
    format!(
        "Package: *\nPin: release n={}\nPin-Priority: {}\n",
        repo.suite, repo.pin_priority
    )
}

/// Files written during one registration pass.
#[derive(Debug, Default)]
pub struct Registration {
    created: Vec<PathBuf>,
    replaced: Vec<(PathBuf, Vec<u8>)>,
}

impl Registration {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.replaced.is_empty()
    }

    #[cfg(test)]
    pub fn created(&self) -> &[PathBuf] {
        &self.created
    }

    pub fn changed_count(&self) -> usize {
        self.created.len() + self.replaced.len()
    }

    /// Remove created files and restore replaced ones. Keeps going on errors.
    pub fn rollback(self) -> Vec<RepoError> {
        let mut errors = Vec::new();

        for path in self.created.iter().rev() {
            match std::fs::remove_file(path) {
                Ok(()) => emit(
                    Level::Info,
                    "repo.rollback.removed",
                    &format!("{} Removed {}", char::from(NerdFont::Trash), path.display()),
                    None,
                ),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => errors.push(RepoError::Io {
                    path: path.clone(),
                    source,
                }),
            }
        }

        for (path, original) in self.replaced {
            if let Err(source) = std::fs::write(&path, original) {
                errors.push(RepoError::Io { path, source });
            } else {
                emit(
                    Level::Info,
                    "repo.rollback.restored",
                    &format!("{} Restored {}", char::from(NerdFont::Refresh), path.display()),
                    None,
                );
            }
        }

        errors
    }

    /// Roll back, reporting anything that could not be undone as a warning.
    pub fn rollback_with_warnings(self) {
        for e in self.rollback() {
            emit(
                Level::Warn,
                "repo.rollback.failed",
                &format!("{} Rollback incomplete: {}", char::from(NerdFont::Warning), e),
                None,
            );
        }
    }

    fn write(
        &mut self,
        executor: &CommandExecutor,
        path: &Path,
        content: &[u8],
    ) -> Result<(), RepoError> {
        let previous = match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(RepoError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if previous.as_deref() == Some(content) {
            emit(
                Level::Debug,
                "repo.file.unchanged",
                &format!("{} already up to date", path.display()),
                None,
            );
            return Ok(());
        }

        if executor.skip_file_operation(&format!("write {}", path.display())) {
            return Ok(());
        }

        let io_err = |source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)?;

        match previous {
            Some(original) => self.replaced.push((path.to_path_buf(), original)),
            None => self.created.push(path.to_path_buf()),
        }
        Ok(())
    }
}

pub struct RepoManager {
    layout: AptLayout,
    executor: CommandExecutor,
}

impl RepoManager {
    pub fn new(layout: AptLayout, executor: CommandExecutor) -> Self {
        Self { layout, executor }
    }

    #[cfg(test)]
    pub fn layout(&self) -> &AptLayout {
        &self.layout
    }

    /// Register every repository. On failure, files written so far are rolled back.
    pub async fn register(&self, repos: &[&RepositoryConfig]) -> Result<Registration, RepoError> {
        let mut registration = Registration::default();

        for repo in repos {
            if let Err(e) = self.register_one(repo, &mut registration).await {
                registration.rollback_with_warnings();
                return Err(e);
            }
        }

        Ok(registration)
    }

    async fn register_one(
        &self,
        repo: &RepositoryConfig,
        registration: &mut Registration,
    ) -> Result<(), RepoError> {
        emit(
            Level::Info,
            "repo.register",
            &format!(
                "{} Registering repository {} ({} {})",
                char::from(NerdFont::Globe),
                repo.name,
                repo.uri,
                repo.suite
            ),
            Some(serde_json::json!({ "name": repo.name, "uri": repo.uri, "suite": repo.suite })),
        );

        if let Some(url) = &repo.key_url {
            let key_path = self.layout.key_path(&repo.name);
            if self.executor.dry_run {
                self.executor
                    .skip_file_operation(&format!("fetch {} into {}", url, key_path.display()));
            } else {
                let key = fetch_key(url).await.map_err(|e| RepoError::KeyFetch {
                    name: repo.name.clone(),
                    url: url.clone(),
                    reason: format!("{e:#}"),
                })?;
                registration.write(&self.executor, &key_path, &key)?;
            }
        }

        registration.write(
            &self.executor,
            &self.layout.list_path(&repo.name),
            sources_entry(repo).as_bytes(),
        )?;
        registration.write(
            &self.executor,
            &self.layout.pin_path(&repo.name),
            pin_entry(repo).as_bytes(),
        )?;
        Ok(())
    }

    /// Delete the key, list and pin of `name`. Missing files are fine.
    pub fn remove(&self, name: &str) -> Result<Vec<PathBuf>, RepoError> {
        let mut removed = Vec::new();
        for path in [
            self.layout.list_path(name),
            self.layout.pin_path(name),
            self.layout.key_path(name),
        ] {
            if !path.exists() {
                continue;
            }
            if self
                .executor
                .skip_file_operation(&format!("remove {}", path.display()))
            {
                continue;
            }
            std::fs::remove_file(&path).map_err(|source| RepoError::Io {
                path: path.clone(),
                source,
            })?;
            removed.push(path);
        }
        Ok(removed)
    }
}

async fn fetch_key(url: &str) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;

    let response = http::client()?
        .get(url)
        .send()
        .await
        .context("Failed to download signing key")?;

    if !response.status().is_success() {
        anyhow::bail!("key server returned status: {}", response.status());
    }

    let bytes = response
        .bytes()
        .await
        .context("Failed to read signing key")?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KALI_ENTRY: &str = "deb [signed-by=/etc/apt/keyrings/kali-rolling.asc] \
        http://http.kali.org/kali kali-rolling main contrib non-free\n";

    fn kali(key: bool) -> RepositoryConfig {
        RepositoryConfig {
            name: "kali-rolling".into(),
            uri: "http://http.kali.org/kali".into(),
            suite: "kali-rolling".into(),
            components: vec!["main".into(), "contrib".into(), "non-free".into()],
            key_url: key.then(|| "https://archive.kali.org/archive-key.asc".to_string()),
            pin_priority: 100,
        }
    }

    fn manager(root: &Path, dry_run: bool) -> RepoManager {
        RepoManager::new(AptLayout::new(root), CommandExecutor::new(dry_run))
    }

    #[test]
    fn sources_entry_references_system_keyring() {
        assert_eq!(sources_entry(&kali(true)), KALI_ENTRY);
        assert_eq!(
            sources_entry(&kali(false)),
            "deb http://http.kali.org/kali kali-rolling main contrib non-free\n"
        );
    }

    #[test]
    fn pin_targets_the_suite() {
        assert_eq!(
            pin_entry(&kali(false)),
            "Package: *\nPin: release n=kali-rolling\nPin-Priority: 100\n"
        );
    }

    #[tokio::test]
    async fn register_writes_list_and_pin() {
        let root = tempfile::tempdir().unwrap();
        let repo = kali(false);
        let mgr = manager(root.path(), false);

        let registration = mgr.register(&[&repo]).await.unwrap();

        assert_eq!(registration.created().len(), 2);
        let layout = mgr.layout();
        assert!(layout.is_registered("kali-rolling"));
        assert_eq!(
            std::fs::read_to_string(layout.pin_path("kali-rolling")).unwrap(),
            pin_entry(&repo)
        );
    }

    #[tokio::test]
    async fn identical_files_are_not_new() {
        let root = tempfile::tempdir().unwrap();
        let repo = kali(false);
        let mgr = manager(root.path(), false);

        mgr.register(&[&repo]).await.unwrap();
        let second = mgr.register(&[&repo]).await.unwrap();
        assert!(second.is_empty());

        // Rolling back the no-op pass leaves the first pass intact
        assert!(second.rollback().is_empty());
        assert!(mgr.layout().is_registered("kali-rolling"));
    }

    #[tokio::test]
    async fn rollback_removes_only_new_files() {
        let root = tempfile::tempdir().unwrap();
        let layout = AptLayout::new(root.path());
        let repo = kali(false);

        // Pre-existing pin with different content, and an unrelated list
        std::fs::create_dir_all(layout.pin_path("x").parent().unwrap()).unwrap();
        std::fs::write(layout.pin_path("kali-rolling"), "Pin-Priority: 990\n").unwrap();
        std::fs::create_dir_all(layout.list_path("x").parent().unwrap()).unwrap();
        let debian = "deb http://deb.debian.org/debian stable main\n";
        std::fs::write(layout.list_path("debian"), debian).unwrap();

        let mgr = manager(root.path(), false);
        let registration = mgr.register(&[&repo]).await.unwrap();
        assert_eq!(registration.changed_count(), 2);

        assert!(registration.rollback().is_empty());
        assert!(!layout.list_path("kali-rolling").exists());
        assert_eq!(
            std::fs::read_to_string(layout.pin_path("kali-rolling")).unwrap(),
            "Pin-Priority: 990\n"
        );
        assert!(layout.list_path("debian").exists());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let repo = kali(true);
        let mgr = manager(root.path(), true);

        let registration = mgr.register(&[&repo]).await.unwrap();
        assert!(registration.is_empty());
        assert!(!mgr.layout().key_path("kali-rolling").exists());
        assert!(!mgr.layout().is_registered("kali-rolling"));
    }

    #[tokio::test]
    async fn remove_deletes_registered_files() {
        let root = tempfile::tempdir().unwrap();
        let repo = kali(false);
        let mgr = manager(root.path(), false);
        mgr.register(&[&repo]).await.unwrap();

        let removed = mgr.remove("kali-rolling").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!mgr.layout().is_registered("kali-rolling"));
        assert!(mgr.remove("kali-rolling").unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_key_fetch_undoes_earlier_repositories() {
        let root = tempfile::tempdir().unwrap();
        let first = RepositoryConfig {
            name: "first".into(),
            ..kali(false)
        };
        // Nothing listens on the discard port
        let second = RepositoryConfig {
            name: "second".into(),
            key_url: Some("http://127.0.0.1:9/key.asc".into()),
            ..kali(false)
        };
        let mgr = manager(root.path(), false);

        let err = mgr.register(&[&first, &second]).await.unwrap_err();

        assert!(matches!(err, RepoError::KeyFetch { ref name, .. } if name == "second"));
        let layout = mgr.layout();
        assert!(!layout.list_path("first").exists());
        assert!(!layout.pin_path("first").exists());
        assert!(!layout.key_path("second").exists());
        assert!(!layout.is_registered("second"));
    }
}
