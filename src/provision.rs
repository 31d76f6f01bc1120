//! The end-to-end provisioning run.
//!
//! Only privilege, repository setup and metadata refresh can stop a run before
//! the install loop. Everything after the loop is best-effort and reported.

use colored::Colorize;
use std::fmt;
use std::io::IsTerminal;
use std::process::Command;
use thiserror::Error;

use crate::apps::{self, AppInstaller};
use crate::common::distro::OperatingSystem;
use crate::common::privilege::{self, PrivilegeError};
use crate::common::{CommandExecutor, StepOutcome, StepReport, paths};
use crate::config::{Config, ConfigError, RepositoryConfig};
use crate::desktop::{DesktopContext, tweaks};
use crate::journal::{AttemptSink, JournalEvent, RunJournal};
use crate::package::{
    AptBackend, CancelToken, PackageInstaller, PackageSpec, RefreshableBackend, RunSummary,
    SourceRef,
};
use crate::repo::{AptLayout, RepoError, RepoManager};
use crate::theme::ThemeInstaller;
use crate::ui::prelude::*;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
    #[error("Repository setup failed: {0}")]
    RepoSetup(#[from] RepoError),
    #[error("Package metadata refresh failed: {0}")]
    Refresh(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProvisionError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Privilege(_) => 2,
            Self::RepoSetup(_) | Self::Refresh(_) | Self::Config(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionOptions {
    pub dry_run: bool,
    pub skip_apps: bool,
    pub skip_theme: bool,
    pub skip_desktop: bool,
    pub no_reboot_prompt: bool,
}

/// What a finished run produced.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub summary: RunSummary,
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn ignored_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| !s.outcome.is_success())
    }

    /// One line per step, aligned on the step name.
    pub fn print_steps(&self) {
        if matches!(get_output_format(), OutputFormat::Json) {
            for step in &self.steps {
                emit(
                    Level::Info,
                    "provision.step",
                    &format!("{}: {}", step.name, step.outcome),
                    serde_json::to_value(step).ok(),
                );
            }
            return;
        }

        let width = self.steps.iter().map(|s| s.name.len()).max().unwrap_or(0);
        for step in &self.steps {
            let reason = step
                .outcome
                .reason()
                .map(|r| format!(" - {}", r.dimmed()))
                .unwrap_or_default();
            println!(
                "  {:<width$}  {}{}",
                step.name.bold(),
                step.outcome.label(),
                reason,
                width = width
            );
        }
    }

    pub fn print(&self) {
        separator(false);
        if !self.steps.is_empty() {
            self.print_steps();
            separator(true);
        }

        if matches!(get_output_format(), OutputFormat::Json) {
            emit(
                Level::Info,
                "provision.summary",
                &self.summary.summary_line(),
                serde_json::to_value(&self.summary).ok(),
            );
            return;
        }
        for package in self.summary.failed_packages() {
            println!("  {} {}", "FAILED".red(), package);
        }
        println!("{}", self.summary.summary_line().bold());
    }
}

/// Preflight, repositories, install loop, then the best-effort steps.
pub async fn run(
    config: &Config,
    options: ProvisionOptions,
    cancel: CancelToken,
) -> Result<ProvisionReport, ProvisionError> {
    let mut journal = RunJournal::open();
    let result = provision(config, options, &cancel, &mut journal).await;
    journal.finish();
    result
}

async fn provision(
    config: &Config,
    options: ProvisionOptions,
    cancel: &CancelToken,
    journal: &mut RunJournal,
) -> Result<ProvisionReport, ProvisionError> {
    let executor = CommandExecutor::new(options.dry_run);
    let privileged = if options.dry_run {
        Ok(())
    } else {
        privilege::require_root()
    };
    required_step(journal, "privilege", privileged)?;
    check_platform();

    let mut apt = AptBackend::new(executor);
    let repos = RepoManager::new(AptLayout::system(), executor);
    let summary = install_phase(config, &mut apt, &repos, journal, cancel).await?;

    let mut report = ProvisionReport {
        summary,
        steps: Vec::new(),
    };
    report
        .steps
        .extend(after_install(config, options, apt, cancel).await);
    record_steps(journal, &report.steps);
    Ok(report)
}

/// Repository setup, metadata refresh and the install loop.
///
/// A failure before the loop is journaled as fatal and aborts the run. A
/// failed refresh also rolls back the repositories registered by this run.
async fn install_phase<B: RefreshableBackend>(
    config: &Config,
    backend: &mut B,
    repos: &RepoManager,
    journal: &mut dyn AttemptSink,
    cancel: &CancelToken,
) -> Result<RunSummary, ProvisionError> {
    let (packages, sources, fallbacks) = required_step(journal, "config", plan(config))?;

    let registered = repos.register(&fallbacks).await;
    let registration = required_step(journal, "repositories", registered)?;
    if registration.is_empty() {
        emit(
            Level::Debug,
            "provision.repositories",
            "Repositories already registered",
            None,
        );
    } else {
        emit(
            Level::Debug,
            "provision.repositories",
            &format!("Wrote {} repository files", registration.changed_count()),
            None,
        );
    }

    let refreshed = backend.refresh();
    if let Err(e) = required_step(journal, "refresh", refreshed) {
        registration.rollback_with_warnings();
        return Err(ProvisionError::Refresh(format!("{e:#}")));
    }

    PackageInstaller::new(backend, journal)
        .with_repair_policy(config.install.repair_policy)
        .with_cancel_token(cancel.clone())
        .install_all(&packages, &sources)
        .map_err(|e| ProvisionError::Config(e.to_string()))
}

type Plan<'a> = (Vec<PackageSpec>, Vec<SourceRef>, Vec<&'a RepositoryConfig>);

fn plan(config: &Config) -> Result<Plan<'_>, ProvisionError> {
    let packages = config.packages();
    if packages.is_empty() {
        return Err(ProvisionError::Config("no packages configured".to_string()));
    }
    let invalid = |e: ConfigError| ProvisionError::Config(e.to_string());
    let sources = config.sources().map_err(invalid)?;
    let fallbacks = config.fallback_repositories().map_err(invalid)?;
    Ok((packages, sources, fallbacks))
}

/// Journal a pre-loop step as fatal when it failed, then hand the result back.
fn required_step<T, E: fmt::Display>(
    journal: &mut dyn AttemptSink,
    name: &str,
    result: Result<T, E>,
) -> Result<T, E> {
    let outcome = StepOutcome::required(&result);
    if outcome.is_fatal() {
        journal.record(JournalEvent::Step {
            name: name.to_string(),
            outcome,
        });
    }
    result
}

/// Apps, theme, desktop and download cleanup. Nothing here changes the exit code.
async fn after_install(
    config: &Config,
    options: ProvisionOptions,
    apt: AptBackend,
    cancel: &CancelToken,
) -> Vec<StepReport> {
    let executor = apt.executor();
    let mut steps = Vec::new();
    let mut pins = Vec::new();

    let run_apps = !options.skip_apps && !config.apps.is_empty();
    if run_apps && !skipped_by_cancel(cancel, &mut steps, "apps") {
        separator(false);
        match paths::downloads_dir().and_then(|dir| AppInstaller::new(apt, dir)) {
            Ok(installer) => {
                let mut installer = installer.with_cancel_token(cancel.clone());
                let outcome = installer.install_all(&config.apps).await;
                steps.extend(outcome.reports);
                pins = outcome.pins;
            }
            Err(e) => steps.push(StepReport::new("apps", StepOutcome::Ignored(format!("{e:#}")))),
        }
    }

    let run_theme_step = !options.skip_theme && config.theme.enabled;
    if run_theme_step && !skipped_by_cancel(cancel, &mut steps, "theme") {
        separator(false);
        steps.extend(run_theme(config, executor));
    }

    let run_desktop_step = !options.skip_desktop && config.desktop.enabled;
    if run_desktop_step && !skipped_by_cancel(cancel, &mut steps, "desktop") {
        separator(false);
        steps.extend(run_desktop(config, &apt, &pins));
    }

    if run_apps {
        let cleanup =
            paths::downloads_dir().and_then(|dir| apps::cleanup_downloads(&dir, executor));
        steps.push(StepReport::new("apps.cleanup", StepOutcome::best_effort(cleanup)));
    }
    steps
}

/// Record `name` as skipped when a cancellation is pending.
fn skipped_by_cancel(cancel: &CancelToken, steps: &mut Vec<StepReport>, name: &str) -> bool {
    if !cancel.is_cancelled() {
        return false;
    }
    emit(
        Level::Warn,
        "provision.cancelled",
        &format!("{} Cancelled, skipping {}", char::from(NerdFont::Warning), name),
        None,
    );
    steps.push(StepReport::new(name, StepOutcome::Ignored("cancelled".to_string())));
    true
}

fn check_platform() {
    let os = OperatingSystem::detect();
    if !os.is_debian_based() {
        emit(
            Level::Warn,
            "provision.distro",
            &format!(
                "{} {} is not Debian based, apt commands will likely fail",
                char::from(NerdFont::Warning),
                os
            ),
            None,
        );
    } else {
        emit(
            Level::Debug,
            "provision.distro",
            &format!("Detected {os}"),
            None,
        );
    }
    if which::which("apt-get").is_err() {
        emit(
            Level::Warn,
            "provision.apt_missing",
            &format!("{} apt-get not found in PATH", char::from(NerdFont::Warning)),
            None,
        );
    }
}

fn record_steps(journal: &mut dyn AttemptSink, steps: &[StepReport]) {
    for step in steps {
        journal.record(JournalEvent::Step {
            name: step.name.clone(),
            outcome: step.outcome.clone(),
        });
    }
}

pub fn run_theme(config: &Config, executor: CommandExecutor) -> Vec<StepReport> {
    let assets = match config.theme.assets_path() {
        Ok(path) => path,
        Err(e) => {
            return vec![StepReport::new(
                "theme.assets",
                StepOutcome::Ignored(format!("{e:#}")),
            )];
        }
    };

    let installer = ThemeInstaller::new(&config.theme, assets, executor);
    let synced = installer.sync_assets();
    let synced_ok = synced.is_ok();
    let mut steps = vec![StepReport::new("theme.assets", StepOutcome::best_effort(synced))];
    if synced_ok {
        steps.extend(installer.install());
    }
    steps
}

pub fn run_desktop(config: &Config, apt: &AptBackend, pins: &[String]) -> Vec<StepReport> {
    if which::which("gsettings").is_err() {
        return vec![StepReport::new(
            "desktop",
            StepOutcome::Ignored("gsettings not found".to_string()),
        )];
    }
    match DesktopContext::detect() {
        Ok(ctx) => tweaks::apply(&config.desktop, &ctx, apt, pins),
        Err(e) => vec![StepReport::new(
            "desktop",
            StepOutcome::Ignored(format!("{e:#}")),
        )],
    }
}

/// Offer a reboot when a person is at the terminal.
pub fn prompt_reboot(config: &Config, options: ProvisionOptions) -> anyhow::Result<()> {
    if options.no_reboot_prompt
        || !config.prompt_reboot
        || options.dry_run
        || !std::io::stdin().is_terminal()
        || !matches!(get_output_format(), OutputFormat::Text)
    {
        return Ok(());
    }

    let reboot = dialoguer::Confirm::new()
        .with_prompt("Reboot now to apply all changes?")
        .default(false)
        .interact()?;
    if reboot {
        CommandExecutor::new(false).run(&mut Command::new("reboot"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::package::types::InstallOutcome;
    use serial_test::serial;

    #[test]
    fn exit_codes() {
        assert_eq!(ProvisionError::from(PrivilegeError::NeedRoot).exit_code(), 2);
        assert_eq!(ProvisionError::Refresh("apt-get update".into()).exit_code(), 1);
        assert_eq!(
            ProvisionError::from(RepoError::Unknown("kali".into())).exit_code(),
            1
        );
        assert_eq!(ProvisionError::Config("bad".into()).exit_code(), 1);
    }

    #[test]
    fn ignored_steps_are_listed() {
        let mut summary = RunSummary::default();
        summary.record(
            &PackageSpec::new("nmap"),
            InstallOutcome::installed(&SourceRef::Default),
        );
        let report = ProvisionReport {
            summary,
            steps: vec![
                StepReport::new("theme.grub", StepOutcome::Success),
                StepReport::new("desktop.font", StepOutcome::Ignored("fc-list missing".into())),
            ],
        };
        let ignored: Vec<&str> = report.ignored_steps().map(|s| s.name.as_str()).collect();
        assert_eq!(ignored, vec!["desktop.font"]);
        assert_eq!(report.summary.summary_line(), "Installed: 1, Failed: 0");
    }

    /// Records installs; refresh fails when asked to.
    #[derive(Default)]
    struct RecordingBackend {
        installs: Vec<String>,
        refreshes: usize,
        refresh_fails: bool,
    }

    impl crate::package::installer::PackageBackend for RecordingBackend {
        fn install(&mut self, package: &PackageSpec, _: &SourceRef) -> anyhow::Result<()> {
            self.installs.push(package.id().to_string());
            Ok(())
        }

        fn repair(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl RefreshableBackend for RecordingBackend {
        fn refresh(&mut self) -> anyhow::Result<()> {
            self.refreshes += 1;
            if self.refresh_fails {
                anyhow::bail!("E: The repository is not signed")
            }
            Ok(())
        }
    }

    fn minimal_config() -> Config {
        let mut config = Config::default();
        config.install.packages = vec!["nmap".into(), "sqlmap".into()];
        config.install.fallbacks.clear();
        config.repositories.clear();
        config.apps.clear();
        config.theme.enabled = false;
        config.desktop.enabled = false;
        config
    }

    /// One unsigned fallback repository, so registration needs no network.
    fn config_with_fallback() -> Config {
        let mut config = minimal_config();
        config.repositories = vec![RepositoryConfig {
            name: "kali-rolling".into(),
            uri: "http://http.kali.org/kali".into(),
            suite: "kali-rolling".into(),
            components: vec!["main".into()],
            key_url: None,
            pin_priority: 100,
        }];
        config.install.fallbacks = vec!["kali-rolling".into()];
        config
    }

    fn is_fatal_step(event: &JournalEvent, step: &str) -> bool {
        matches!(
            event,
            JournalEvent::Step { name, outcome: StepOutcome::Fatal(_) } if name == step
        )
    }

    #[tokio::test]
    async fn failed_refresh_rolls_back_before_any_install() {
        let root = tempfile::tempdir().unwrap();
        let layout = AptLayout::new(root.path());
        let repos = RepoManager::new(layout.clone(), CommandExecutor::new(false));
        let mut backend = RecordingBackend {
            refresh_fails: true,
            ..Default::default()
        };
        let mut journal = MemoryJournal::default();

        let err = install_phase(
            &config_with_fallback(),
            &mut backend,
            &repos,
            &mut journal,
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProvisionError::Refresh(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(backend.refreshes, 1);
        assert!(backend.installs.is_empty());
        assert!(!layout.is_registered("kali-rolling"));
        assert!(!layout.pin_path("kali-rolling").exists());
        assert!(journal.events().any(|e| is_fatal_step(e, "refresh")));
        assert!(!journal
            .events()
            .any(|e| matches!(e, JournalEvent::Attempt { .. })));
    }

    #[tokio::test]
    async fn registered_fallback_feeds_the_install_loop() {
        let root = tempfile::tempdir().unwrap();
        let layout = AptLayout::new(root.path());
        let repos = RepoManager::new(layout.clone(), CommandExecutor::new(false));
        let mut backend = RecordingBackend::default();
        let mut journal = MemoryJournal::default();

        let summary = install_phase(
            &config_with_fallback(),
            &mut backend,
            &repos,
            &mut journal,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.installed, 2);
        assert_eq!(backend.installs, vec!["nmap", "sqlmap"]);
        assert!(layout.is_registered("kali-rolling"));
        assert!(!journal
            .events()
            .any(|e| matches!(e, JournalEvent::Step { .. })));
    }

    #[tokio::test]
    async fn unknown_fallback_is_a_fatal_config_step() {
        let root = tempfile::tempdir().unwrap();
        let repos = RepoManager::new(AptLayout::new(root.path()), CommandExecutor::new(false));
        let mut config = minimal_config();
        config.install.fallbacks = vec!["nowhere".into()];
        let mut backend = RecordingBackend::default();
        let mut journal = MemoryJournal::default();

        let err = install_phase(&config, &mut backend, &repos, &mut journal, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Config(_)));
        assert_eq!(backend.refreshes, 0);
        assert!(journal.events().any(|e| is_fatal_step(e, "config")));
    }

    #[test]
    fn privilege_failure_is_journaled_as_fatal() {
        let mut journal = MemoryJournal::default();
        let denied = Err::<(), _>(PrivilegeError::NeedRoot);
        let result = required_step(&mut journal, "privilege", denied);

        assert!(matches!(
            result.map_err(ProvisionError::from),
            Err(ProvisionError::Privilege(_))
        ));
        assert!(journal.events().any(|e| is_fatal_step(e, "privilege")));

        required_step(&mut journal, "refresh", Ok::<(), String>(())).unwrap();
        assert_eq!(journal.events().count(), 1);
    }

    #[tokio::test]
    async fn cancellation_skips_steps_after_the_loop() {
        let mut config = minimal_config();
        config.theme.enabled = true;
        config.desktop.enabled = true;
        let cancel = CancelToken::new();
        cancel.cancel();

        let steps = after_install(
            &config,
            ProvisionOptions::default(),
            AptBackend::new(CommandExecutor::new(true)),
            &cancel,
        )
        .await;

        let cancelled = StepOutcome::Ignored("cancelled".into());
        assert_eq!(
            steps,
            vec![
                StepReport::new("theme", cancelled.clone()),
                StepReport::new("desktop", cancelled),
            ]
        );
    }

    #[tokio::test]
    #[serial]
    async fn dry_run_reaches_the_summary() {
        let home = tempfile::tempdir().unwrap();
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var("XDG_DATA_HOME", home.path()) };

        let options = ProvisionOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(&minimal_config(), options, CancelToken::new()).await.unwrap();

        assert_eq!(report.summary.installed, 2);
        assert_eq!(report.summary.failed, 0);
        assert!(report.steps.is_empty());
        assert!(home.path().join("startup/logs/install.jsonl").exists());
    }

    #[tokio::test]
    #[serial]
    async fn cancelled_before_start_records_nothing() {
        let home = tempfile::tempdir().unwrap();
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var("XDG_DATA_HOME", home.path()) };

        let cancel = CancelToken::new();
        cancel.cancel();
        let options = ProvisionOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(&minimal_config(), options, cancel).await.unwrap();

        assert!(report.summary.cancelled);
        assert!(report.summary.results.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn empty_package_list_is_a_config_error() {
        let home = tempfile::tempdir().unwrap();
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var("XDG_DATA_HOME", home.path()) };

        let mut config = minimal_config();
        config.install.packages.clear();
        let options = ProvisionOptions {
            dry_run: true,
            ..Default::default()
        };
        let err = run(&config, options, CancelToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);

        let journal = std::fs::read_to_string(home.path().join("startup/logs/install.jsonl"))
            .unwrap();
        assert!(journal.contains("\"status\":\"fatal\""));
    }
}
