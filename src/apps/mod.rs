//! Third-party applications that are not in any apt source.
//!
//! Each app is downloaded into the downloads directory, optionally verified,
//! and installed according to its kind. A failing app never stops the run.

pub mod download;

use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::common::{CommandExecutor, StepOutcome, StepReport, http, paths};
use crate::config::{AppConfig, AppKind};
use crate::package::{AptBackend, CancelToken, PackageSpec};
use crate::ui::prelude::*;
use download::{Downloader, file_name_for, verify_sha256};

const APPLICATIONS_DIR: &str = "/usr/share/applications";

/// Results of an apps pass: one report per app plus desktop ids to pin.
#[derive(Debug, Default)]
pub struct AppsOutcome {
    pub reports: Vec<StepReport>,
    pub pins: Vec<String>,
}

pub struct AppInstaller {
    apt: AptBackend,
    downloader: Downloader,
    downloads: PathBuf,
    applications_dir: PathBuf,
    cancel: CancelToken,
}

impl AppInstaller {
    pub fn new(apt: AptBackend, downloads: PathBuf) -> Result<Self> {
        Ok(Self {
            apt,
            downloader: Downloader::new(http::client()?),
            downloads,
            applications_dir: PathBuf::from(APPLICATIONS_DIR),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    fn executor(&self) -> CommandExecutor {
        self.apt.executor()
    }

    /// Install `apps` in order. Stops before the next app once cancelled.
    pub async fn install_all(&mut self, apps: &[AppConfig]) -> AppsOutcome {
        let mut outcome = AppsOutcome::default();

        for (index, app) in apps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let skipped: Vec<&str> = apps[index..].iter().map(|a| a.name.as_str()).collect();
                outcome.reports.push(StepReport::new(
                    "apps",
                    StepOutcome::Ignored(format!("cancelled before {}", skipped.join(", "))),
                ));
                break;
            }
            separator(true);
            let result = self.install(app).await;
            if let Err(e) = &result {
                emit(
                    Level::Error,
                    "apps.failed",
                    &format!("{} {} failed: {e:#}", char::from(NerdFont::CrossCircle), app.name),
                    Some(serde_json::json!({ "app": app.name })),
                );
            } else {
                emit(
                    Level::Success,
                    "apps.installed",
                    &format!("{} {} installed", char::from(NerdFont::Check), app.name),
                    Some(serde_json::json!({ "app": app.name })),
                );
                let pin = first_existing_desktop_file(&self.applications_dir, &app.desktop_files);
                outcome.pins.extend(pin);
            }
            outcome.reports.push(StepReport::new(
                format!("app.{}", app.name),
                StepOutcome::best_effort(result),
            ));
        }

        outcome
    }

    pub async fn install(&mut self, app: &AppConfig) -> Result<()> {
        emit(
            Level::Info,
            "apps.install",
            &format!("{} Installing {}", char::from(NerdFont::Package), app.name),
            None,
        );

        let file = self.fetch(app).await?;
        match app.kind {
            AppKind::Deb => self.install_deb(app, &file),
            AppKind::Tarball => self.install_tarball(app, &file),
            AppKind::Script => self.install_script(app, &file),
        }
    }

    async fn fetch(&self, app: &AppConfig) -> Result<PathBuf> {
        let executor = self.executor();

        let url = match &app.discover {
            Some(pattern) if executor.dry_run => {
                executor.skip_file_operation(&format!(
                    "discover archive link on {} ({pattern})",
                    app.url
                ));
                app.url.clone()
            }
            Some(pattern) => {
                let link = self.downloader.discover_link(&app.url, pattern).await?;
                emit(
                    Level::Info,
                    "apps.discovered",
                    &format!("{} Found archive link: {}", char::from(NerdFont::Globe), link),
                    None,
                );
                link
            }
            None => app.url.clone(),
        };

        let name = match app.kind {
            AppKind::Deb if !url.ends_with(".deb") => format!("{}.deb", app.name),
            _ => file_name_for(&url).unwrap_or_else(|| app.name.clone()),
        };
        let dest = self.downloads.join(name);

        if executor.skip_file_operation(&format!("download {} to {}", url, dest.display())) {
            return Ok(dest);
        }
        self.downloader.download(&url, &dest).await?;

        if let Some(expected) = &app.sha256 {
            if let Err(e) = verify_sha256(&dest, expected) {
                let _ = std::fs::remove_file(&dest);
                return Err(e);
            }
        }
        Ok(dest)
    }

    fn install_deb(&mut self, app: &AppConfig, file: &Path) -> Result<()> {
        self.apt.install_local(file)?;

        if app.one_of.is_empty() && app.packages.is_empty() {
            return Ok(());
        }

        // The .deb may have added a repository
        self.apt.refresh()?;

        if !app.one_of.is_empty() {
            let installed = app.one_of.iter().find(|name| {
                match self.apt.install_many(&[PackageSpec::new(name.as_str())]) {
                    Ok(()) => true,
                    Err(e) => {
                        emit(
                            Level::Warn,
                            "apps.candidate.failed",
                            &format!(
                                "{} {} not installable: {e:#}",
                                char::from(NerdFont::Warning),
                                name
                            ),
                            None,
                        );
                        false
                    }
                }
            });
            match installed {
                Some(name) => emit(
                    Level::Info,
                    "apps.candidate.installed",
                    &format!("Installed {} for {}", name, app.name),
                    None,
                ),
                None => anyhow::bail!("none of {} could be installed", app.one_of.join(", ")),
            }
        }

        let extra: Vec<PackageSpec> = app
            .packages
            .iter()
            .map(|p| PackageSpec::new(p.as_str()))
            .collect();
        self.apt
            .install_many(&extra)
            .with_context(|| format!("installing extra packages for {}", app.name))
    }

    fn install_tarball(&self, app: &AppConfig, file: &Path) -> Result<()> {
        let executor = self.executor();
        let install_dir = app
            .install_dir
            .as_deref()
            .map(paths::expand)
            .with_context(|| format!("{} has no install_dir", app.name))?;

        if install_dir.exists()
            && !executor.skip_file_operation(&format!("remove {}", install_dir.display()))
        {
            std::fs::remove_dir_all(&install_dir)
                .with_context(|| format!("removing old {}", install_dir.display()))?;
        }
        if !executor.skip_file_operation(&format!("create {}", install_dir.display())) {
            std::fs::create_dir_all(&install_dir)
                .with_context(|| format!("creating {}", install_dir.display()))?;
        }

        let mut tar = Command::new("tar");
        tar.arg("-xf")
            .arg(file)
            .arg("-C")
            .arg(&install_dir)
            .arg("--strip-components=1");
        executor.run(&mut tar)?;

        if let Some(binary) = &app.binary {
            let path = install_dir.join(binary);
            if !executor.skip_file_operation(&format!("chmod 755 {}", path.display())) {
                if !path.is_file() {
                    anyhow::bail!("{} not found after extraction", path.display());
                }
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                    .with_context(|| format!("making {} executable", path.display()))?;
            }
        }
        Ok(())
    }

    fn install_script(&self, app: &AppConfig, file: &Path) -> Result<()> {
        let mut cmd = Command::new("sh");
        cmd.arg(file);
        cmd.envs(&app.env);
        self.executor().run(&mut cmd)
    }
}

/// First of `candidates` present in `applications_dir`
pub fn first_existing_desktop_file(
    applications_dir: &Path,
    candidates: &[String],
) -> Option<String> {
    candidates
        .iter()
        .find(|id| applications_dir.join(id.as_str()).is_file())
        .cloned()
}

/// Empty the downloads directory, keeping the directory itself.
pub fn cleanup_downloads(dir: &Path, executor: CommandExecutor) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if executor.skip_file_operation(&format!("clean {}", dir.display())) {
        return Ok(());
    }

    let mut failures = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = removed {
            failures.push(format!("{}: {e}", path.display()));
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("could not remove {}", failures.join("; "));
    }
    emit(
        Level::Info,
        "apps.cleanup",
        &format!("{} Download folder cleaned up", char::from(NerdFont::Trash)),
        None,
    );
    Ok(())
}
