//! GRUB theme, grub.cfg and wallpapers from the assets checkout.
//!
//! Nothing is overwritten in place: every existing target is first moved to a
//! fresh backup path next to it (or into a `backup/` directory).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::git::{self, SyncResult};
use crate::common::progress::{create_spinner, finish_with_failure};
use crate::common::{CommandExecutor, StepOutcome, StepReport};
use crate::config::ThemeConfig;
use crate::ui::prelude::*;

/// `base` if free, else `base.<ts>`, else `base.<ts>.<n>` for the first free `n`.
pub fn unique_backup_path(base: &Path) -> PathBuf {
    unique_backup_path_at(base, chrono::Utc::now().timestamp())
}

fn unique_backup_path_at(base: &Path, timestamp: i64) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let stamped = format!("{}.{}", base.display(), timestamp);
    let mut candidate = PathBuf::from(&stamped);
    let mut counter = 0u32;
    while candidate.exists() {
        counter += 1;
        candidate = PathBuf::from(format!("{stamped}.{counter}"));
    }
    candidate
}

/// `root` joined with an absolute system path
fn under_root(root: &Path, system_path: &str) -> PathBuf {
    root.join(system_path.trim_start_matches('/'))
}

/// Copy a directory tree; returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("walked outside the source tree")?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("copying {} to {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Rename, falling back to copy + delete across filesystems
fn move_path(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let removed = if from.is_dir() {
        copy_tree(from, to)?;
        std::fs::remove_dir_all(from)
    } else {
        std::fs::copy(from, to)
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
        std::fs::remove_file(from)
    };
    removed.with_context(|| format!("removing {} after copy", from.display()))
}

pub struct ThemeInstaller<'a> {
    config: &'a ThemeConfig,
    assets: PathBuf,
    root: PathBuf,
    executor: CommandExecutor,
}

impl<'a> ThemeInstaller<'a> {
    pub fn new(config: &'a ThemeConfig, assets: PathBuf, executor: CommandExecutor) -> Self {
        Self {
            config,
            assets,
            root: config.root_path(),
            executor,
        }
    }

    /// Clone or update the assets repository, if one is configured.
    pub fn sync_assets(&self) -> Result<()> {
        let Some(url) = &self.config.assets_repo else {
            if !self.assets.is_dir() {
                anyhow::bail!("assets directory {} does not exist", self.assets.display());
            }
            return Ok(());
        };

        if self
            .executor
            .skip_file_operation(&format!("sync {} into {}", url, self.assets.display()))
        {
            return Ok(());
        }

        let pb = create_spinner(format!("Syncing theme assets from {url}"));
        let result = match git::sync_repo(url, &self.assets, self.config.assets_branch.as_deref()) {
            Ok(result) => {
                pb.finish_and_clear();
                result
            }
            Err(e) => {
                finish_with_failure(pb);
                return Err(e);
            }
        };
        let message = match &result {
            SyncResult::Cloned => format!("Cloned theme assets into {}", self.assets.display()),
            SyncResult::Updated => format!("Updated theme assets in {}", self.assets.display()),
            SyncResult::Recloned { backup, reason } => format!(
                "Theme assets could not be updated ({reason}); old checkout kept at {}",
                backup.display()
            ),
        };
        emit(
            Level::Info,
            "theme.assets",
            &format!("{} {}", char::from(NerdFont::Folder), message),
            None,
        );
        Ok(())
    }

    pub fn install(&self) -> Vec<StepReport> {
        let mut reports = Vec::new();
        if self.config.grub.enabled {
            reports.push(StepReport::new(
                "theme.grub",
                StepOutcome::best_effort(self.install_grub()),
            ));
        }
        if self.config.wallpapers.enabled {
            reports.push(StepReport::new(
                "theme.wallpapers",
                StepOutcome::best_effort(self.install_wallpapers()),
            ));
        }
        reports
    }

    fn backup(&self, target: &Path, base: &Path) -> Result<()> {
        if !target.exists() {
            return Ok(());
        }
        let backup = unique_backup_path(base);
        if self.executor.skip_file_operation(&format!(
            "move {} to {}",
            target.display(),
            backup.display()
        )) {
            return Ok(());
        }
        move_path(target, &backup)?;
        emit(
            Level::Info,
            "theme.backup",
            &format!(
                "{} Backed up {} -> {}",
                char::from(NerdFont::Archive),
                target.display(),
                backup.display()
            ),
            None,
        );
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if self
            .executor
            .skip_file_operation(&format!("copy {} to {}", src.display(), dst.display()))
        {
            return Ok(());
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::copy(src, dst)
            .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
        Ok(())
    }

    fn copy_dir(&self, src: &Path, dst: &Path) -> Result<()> {
        if self
            .executor
            .skip_file_operation(&format!("copy tree {} to {}", src.display(), dst.display()))
        {
            return Ok(());
        }
        copy_tree(src, dst)?;
        Ok(())
    }

    pub fn install_grub(&self) -> Result<()> {
        let grub = &self.config.grub;
        let cfg_src = self.assets.join(&grub.config_file);
        let theme_src = self.assets.join(&grub.theme_dir);
        if !cfg_src.is_file() {
            anyhow::bail!("{} not found in theme assets", cfg_src.display());
        }
        if !theme_src.is_dir() {
            anyhow::bail!("{} not found in theme assets", theme_src.display());
        }

        emit(
            Level::Info,
            "theme.grub",
            &format!("{} Installing GRUB theme {}", char::from(NerdFont::Palette), grub.theme_name),
            None,
        );

        let grub_dir = under_root(&self.root, "/boot/grub");
        let grub_cfg = grub_dir.join("grub.cfg");
        self.backup(&grub_cfg, &grub_dir.join("grub.cfg.b"))?;
        self.copy_file(&cfg_src, &grub_cfg)?;

        // The boot copy is installed first and then mirrored into /usr/share
        let boot_themes = grub_dir.join("themes");
        let share_themes = under_root(&self.root, "/usr/share/grub/themes");
        let boot_theme = boot_themes.join(&grub.theme_name);
        for (themes, source) in [(&boot_themes, &theme_src), (&share_themes, &boot_theme)] {
            let target = themes.join(&grub.theme_name);
            self.backup(
                &target,
                &themes.join("backup").join(format!("{}.b", grub.theme_name)),
            )?;
            // In a dry run the boot copy never appears; mirror from the assets instead
            let source = if self.executor.dry_run { &theme_src } else { source };
            self.copy_dir(source, &target)?;
        }

        emit(
            Level::Success,
            "theme.grub.done",
            &format!("{} GRUB theme installed", char::from(NerdFont::Check)),
            None,
        );
        Ok(())
    }

    pub fn install_wallpapers(&self) -> Result<()> {
        let wallpapers = &self.config.wallpapers;
        let source_dir = self.assets.join(&wallpapers.source_dir);
        let missing: Vec<String> = wallpapers
            .mappings
            .iter()
            .filter(|m| !source_dir.join(&m.source).is_file())
            .map(|m| m.source.clone())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!(
                "wallpapers missing from {}: {}",
                source_dir.display(),
                missing.join(", ")
            );
        }

        let backgrounds = under_root(&self.root, &wallpapers.backgrounds_dir);
        let backup_dir = backgrounds.join("backup");

        let mut to_backup: Vec<&str> = wallpapers
            .mappings
            .iter()
            .map(|m| m.target.as_str())
            .collect();
        for extra in &wallpapers.backup_extra {
            if !to_backup.contains(&extra.as_str()) {
                to_backup.push(extra);
            }
        }
        for name in to_backup {
            self.backup(&backgrounds.join(name), &backup_dir.join(format!("{name}.b")))?;
        }

        for mapping in &wallpapers.mappings {
            self.copy_file(&source_dir.join(&mapping.source), &backgrounds.join(&mapping.target))?;
        }

        emit(
            Level::Success,
            "theme.wallpapers.done",
            &format!(
                "{} {} wallpapers installed into {}",
                char::from(NerdFont::Check),
                wallpapers.mappings.len(),
                backgrounds.display()
            ),
            None,
        );
        Ok(())
    }
}
