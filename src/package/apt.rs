use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

use super::installer::{PackageBackend, RefreshableBackend};
use super::types::{PackageSpec, SourceRef};
use crate::common::CommandExecutor;
use crate::ui::prelude::*;

/// apt/dpkg through the dry-run aware executor.
#[derive(Debug, Clone, Copy)]
pub struct AptBackend {
    executor: CommandExecutor,
}

impl AptBackend {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> CommandExecutor {
        self.executor
    }

    /// `apt-get update`
    pub fn refresh(&self) -> Result<()> {
        self.executor
            .run(&mut refresh_command())
            .context("Failed to refresh package metadata")
    }

    /// Install a downloaded `.deb`, repairing dependencies if dpkg leaves it unconfigured.
    pub fn install_local(&mut self, path: &Path) -> Result<()> {
        let mut cmd = apt_command("dpkg");
        cmd.arg("-i").arg(path);

        if let Err(e) = self.executor.run(&mut cmd) {
            emit(
                Level::Warn,
                "apt.dpkg.failed",
                &format!(
                    "{} dpkg could not configure {}: {e:#}",
                    char::from(NerdFont::Warning),
                    path.display()
                ),
                None,
            );
            self.repair()
                .with_context(|| format!("Failed to install {}", path.display()))?;
        }
        Ok(())
    }

    /// Plain `apt-get install` of several packages from the default sources.
    pub fn install_many(&self, packages: &[PackageSpec]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut cmd = apt_command("apt-get");
        cmd.args(["install", "-y"]);
        cmd.args(packages.iter().map(PackageSpec::id));
        self.executor.run(&mut cmd)
    }
}

impl PackageBackend for AptBackend {
    fn install(&mut self, package: &PackageSpec, source: &SourceRef) -> Result<()> {
        self.executor.run(&mut install_command(package, source))
    }

    fn repair(&mut self) -> Result<()> {
        self.executor.run(&mut repair_command())
    }
}

impl RefreshableBackend for AptBackend {
    fn refresh(&mut self) -> Result<()> {
        AptBackend::refresh(self)
    }
}

fn apt_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.env("DEBIAN_FRONTEND", "noninteractive");
    cmd
}

pub(crate) fn install_command(package: &PackageSpec, source: &SourceRef) -> Command {
    let mut cmd = apt_command("apt-get");
    cmd.args(["install", "-y"]);
    if let SourceRef::Repository { release, .. } = source {
        cmd.args(["-t", release]);
    }
    cmd.arg(package.id());
    cmd
}

pub(crate) fn repair_command() -> Command {
    let mut cmd = apt_command("apt-get");
    cmd.args(["--fix-broken", "install", "-y"]);
    cmd
}

pub(crate) fn refresh_command() -> Command {
    let mut cmd = apt_command("apt-get");
    cmd.arg("update");
    cmd
}
