mod apps;
mod common;
mod completions;
mod config;
mod desktop;
mod journal;
mod package;
mod provision;
mod repo;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::apps::AppInstaller;
use crate::common::privilege::{self, PrivilegeError};
use crate::common::{CommandExecutor, StepReport, paths};
use crate::completions::SupportedShell;
use crate::config::{AppConfig, Config};
use crate::desktop::commands::DesktopCommands;
use crate::desktop::{DesktopContext, GSettings};
use crate::journal::{FileJournal, RunJournal};
use crate::package::{
    AptBackend, CancelToken, PackageInstaller, PackageSpec, RunSummary, SourceRef,
};
use crate::provision::{ProvisionError, ProvisionOptions, ProvisionReport};
use crate::repo::AptLayout;
use crate::repo::commands::RepoCommands;
use crate::ui::prelude::*;

/// Provision a Debian-family desktop: packages with fallbacks, apps, theme and GNOME settings
#[derive(Parser, Debug)]
#[command(name = "startup", author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Full provisioning run
    Run {
        /// Print every mutating command instead of running it
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        skip_apps: bool,
        #[arg(long)]
        skip_theme: bool,
        #[arg(long)]
        skip_desktop: bool,
        /// Never ask to reboot at the end
        #[arg(long)]
        no_reboot_prompt: bool,
    },
    /// Install packages with the fallback ladder only
    Packages {
        #[arg(long)]
        dry_run: bool,
        /// Fallback repository (repeatable, in order). Defaults to the configured fallbacks
        #[arg(long = "fallback", value_name = "NAME")]
        fallbacks: Vec<String>,
        /// Packages to install. Defaults to the configured list
        packages: Vec<String>,
    },
    /// Manage foreign apt repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Download and install third-party applications
    Apps {
        #[arg(long)]
        dry_run: bool,
        /// Only these apps (default: all configured apps)
        names: Vec<String>,
    },
    /// Install the GRUB theme and wallpapers
    Theme {
        #[arg(long)]
        dry_run: bool,
    },
    /// GNOME font, settings and dock favorites
    Desktop {
        #[command(subcommand)]
        command: DesktopCommands,
    },
    /// Show the install journal
    Logs {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Delete the journal
        #[arg(long)]
        clear: bool,
    },
    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Print or install shell completions
    Completions {
        #[arg(value_enum)]
        shell: SupportedShell,
        /// Write the script to the completions directory instead of stdout
        #[arg(long)]
        install: bool,
        /// Destination file for --install
        #[arg(long = "path", value_hint = ValueHint::FilePath, requires = "install")]
        target: Option<PathBuf>,
        #[arg(long, requires = "install")]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
}

pub fn cli_command() -> clap::Command {
    Cli::command()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::set_debug_mode(cli.debug);
    if cli.no_color {
        colored::control::set_override(false);
    }
    ui::init(cli.output, !cli.no_color);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            emit(
                Level::Error,
                "error",
                &format!("{} {e:#}", char::from(NerdFont::CrossCircle)),
                None,
            );
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<ProvisionError>() {
        return e.exit_code();
    }
    if error.downcast_ref::<PrivilegeError>().is_some() {
        return 2;
    }
    1
}

/// The first Ctrl-C cancels between steps, a second one aborts with status 130.
fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if watch_interrupts(handle, tokio::signal::ctrl_c).await {
            std::process::exit(130);
        }
    });
    token
}

/// Returns true once a second interrupt arrives.
async fn watch_interrupts<F, Fut>(token: CancelToken, mut interrupted: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupted().await.is_err() {
        return false;
    }
    token.cancel();
    emit(
        Level::Warn,
        "cancel.requested",
        &format!(
            "{} Interrupted, stopping after the current step. Press Ctrl-C again to abort",
            char::from(NerdFont::Warning)
        ),
        None,
    );

    if interrupted().await.is_err() {
        return false;
    }
    emit(
        Level::Error,
        "cancel.aborted",
        &format!("{} Aborted", char::from(NerdFont::CrossCircle)),
        None,
    );
    true
}

/// A run that reached the install loop exits 0. The reboot offer can only warn.
fn finish_run(cancelled: bool, offer_reboot: impl FnOnce() -> Result<()>) -> i32 {
    if cancelled {
        return 0;
    }
    if let Err(e) = offer_reboot() {
        emit(
            Level::Warn,
            "provision.reboot_failed",
            &format!("{} Reboot skipped: {e:#}", char::from(NerdFont::Warning)),
            None,
        );
    }
    0
}

fn config_path(cli_path: Option<&PathBuf>) -> Result<PathBuf> {
    match cli_path {
        Some(path) => Ok(path.clone()),
        None => paths::default_config_file(),
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config_override = cli.config.as_ref();
    let load = || Config::load(config_override.map(PathBuf::as_path));

    match cli.command {
        Commands::Run {
            dry_run,
            skip_apps,
            skip_theme,
            skip_desktop,
            no_reboot_prompt,
        } => {
            let config = load().map_err(|e| ProvisionError::Config(format!("{e:#}")))?;
            let options = ProvisionOptions {
                dry_run,
                skip_apps,
                skip_theme,
                skip_desktop,
                no_reboot_prompt,
            };
            let report = provision::run(&config, options, cancel_on_ctrl_c()).await?;
            report.print();
            Ok(finish_run(report.summary.cancelled, || {
                provision::prompt_reboot(&config, options)
            }))
        }
        Commands::Packages {
            dry_run,
            fallbacks,
            packages,
        } => {
            let config = load()?;
            let summary = install_packages(&config, dry_run, &fallbacks, &packages)?;
            ProvisionReport {
                summary,
                steps: Vec::new(),
            }
            .print();
            Ok(0)
        }
        Commands::Repo { command } => {
            let config = load()?;
            repo::commands::handle_repo_command(&config, command).await?;
            Ok(0)
        }
        Commands::Apps { dry_run, names } => {
            let config = load()?;
            let steps = install_apps(&config, dry_run, &names).await?;
            print_steps(steps);
            Ok(0)
        }
        Commands::Theme { dry_run } => {
            let config = load()?;
            if !dry_run {
                privilege::require_root()?;
            }
            print_steps(provision::run_theme(&config, CommandExecutor::new(dry_run)));
            Ok(0)
        }
        Commands::Desktop { command } => {
            let config = load()?;
            let steps = desktop::commands::handle_desktop_command(&config, command)?;
            if !steps.is_empty() {
                print_steps(steps);
            }
            Ok(0)
        }
        Commands::Logs { limit, clear } => {
            let journal = FileJournal::open_default()?;
            if clear {
                journal.clear()?;
                emit(
                    Level::Success,
                    "logs.cleared",
                    &format!("{} Install journal cleared", char::from(NerdFont::Trash)),
                    None,
                );
            } else {
                journal.print_recent(limit)?;
            }
            Ok(0)
        }
        Commands::Config { command } => {
            handle_config_command(config_override, command)?;
            Ok(0)
        }
        Commands::Completions {
            shell,
            install,
            target,
            force,
        } => {
            if install {
                let path = completions::install(shell, target, force)?;
                emit(
                    Level::Success,
                    "completions.installed",
                    &format!(
                        "{} Installed {} completions to {}",
                        char::from(NerdFont::Check),
                        shell,
                        path.display()
                    ),
                    None,
                );
                println!("{}", completions::instructions(shell, &path));
            } else {
                print!("{}", completions::generate(shell)?);
            }
            Ok(0)
        }
    }
}

fn print_steps(steps: Vec<StepReport>) {
    let report = ProvisionReport {
        summary: RunSummary::default(),
        steps,
    };
    let failed = report.ignored_steps().count();
    let total = report.steps.len();
    report.print_steps();
    emit(
        Level::Info,
        "steps.summary",
        &format!("{} of {} steps succeeded", total - failed, total),
        None,
    );
}

fn install_packages(
    config: &Config,
    dry_run: bool,
    fallbacks: &[String],
    packages: &[String],
) -> Result<RunSummary> {
    if !dry_run {
        privilege::require_root()?;
    }

    let packages: Vec<PackageSpec> = if packages.is_empty() {
        config.packages()
    } else {
        packages.iter().map(|p| PackageSpec::new(p.as_str())).collect()
    };

    let sources: Vec<SourceRef> = if fallbacks.is_empty() {
        config.sources()?
    } else {
        let mut sources = vec![SourceRef::Default];
        for name in fallbacks {
            let repo = config
                .repository(name)
                .ok_or_else(|| repo::RepoError::Unknown(name.clone()))?;
            sources.push(repo.source());
        }
        sources
    };

    let layout = AptLayout::system();
    for source in sources.iter().filter(|s| !s.is_default()) {
        if !layout.is_registered(source.name()) {
            emit(
                Level::Warn,
                "packages.repo_missing",
                &format!(
                    "{} {} is not registered, run `startup repo add {}` first",
                    char::from(NerdFont::Warning),
                    source.name(),
                    source.name()
                ),
                None,
            );
        }
    }

    let mut apt = AptBackend::new(CommandExecutor::new(dry_run));
    let mut journal = RunJournal::open();
    let summary = PackageInstaller::new(&mut apt, &mut journal)
        .with_repair_policy(config.install.repair_policy)
        .with_cancel_token(cancel_on_ctrl_c())
        .install_all(&packages, &sources);
    journal.finish();
    Ok(summary?)
}

async fn install_apps(
    config: &Config,
    dry_run: bool,
    names: &[String],
) -> Result<Vec<StepReport>> {
    if !dry_run {
        privilege::require_root()?;
    }

    let selected: Vec<AppConfig> = if names.is_empty() {
        config.apps.clone()
    } else {
        names
            .iter()
            .map(|name| {
                config
                    .apps
                    .iter()
                    .find(|a| &a.name == name)
                    .cloned()
                    .with_context(|| format!("app '{name}' is not configured"))
            })
            .collect::<Result<_>>()?
    };

    let executor = CommandExecutor::new(dry_run);
    let downloads = paths::downloads_dir()?;
    let mut installer = AppInstaller::new(AptBackend::new(executor), downloads.clone())?;
    let outcome = installer.install_all(&selected).await;
    let mut steps = outcome.reports;

    if !outcome.pins.is_empty() && which::which("gsettings").is_ok() {
        let pinned = DesktopContext::detect()
            .and_then(|ctx| GSettings::new(&ctx, executor).pin(&outcome.pins));
        steps.push(StepReport::new(
            "desktop.favorites",
            common::StepOutcome::best_effort(pinned),
        ));
    }

    steps.push(StepReport::new(
        "apps.cleanup",
        common::StepOutcome::best_effort(apps::cleanup_downloads(&downloads, executor)),
    ));
    Ok(steps)
}

fn handle_config_command(
    config_override: Option<&PathBuf>,
    command: ConfigCommands,
) -> Result<()> {
    let path = config_path(config_override)?;
    match command {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
            }
            Config::default().save(&path)?;
            emit(
                Level::Success,
                "config.init",
                &format!(
                    "{} Wrote default configuration to {}",
                    char::from(NerdFont::Check),
                    path.display()
                ),
                Some(serde_json::json!({ "path": path })),
            );
        }
        ConfigCommands::Show => {
            let config = Config::load(config_override.map(PathBuf::as_path))?;
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[test]
    fn cli_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn privilege_errors_exit_with_two() {
        let err = anyhow::Error::from(PrivilegeError::NeedRoot);
        assert_eq!(exit_code_for(&err), 2);
        let err = anyhow::Error::from(ProvisionError::Refresh("apt-get update".into()));
        assert_eq!(exit_code_for(&err), 1);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn packages_accepts_repeated_fallbacks() {
        let cli = Cli::try_parse_from([
            "startup",
            "packages",
            "--dry-run",
            "--fallback",
            "kali-rolling",
            "nmap",
            "sqlmap",
        ])
        .unwrap();
        match cli.command {
            Commands::Packages {
                dry_run,
                fallbacks,
                packages,
            } => {
                assert!(dry_run);
                assert_eq!(fallbacks, vec!["kali-rolling"]);
                assert_eq!(packages, vec!["nmap", "sqlmap"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn failed_reboot_offer_keeps_exit_code_zero() {
        assert_eq!(finish_run(false, || anyhow::bail!("reboot: not found")), 0);

        let mut offered = false;
        assert_eq!(
            finish_run(true, || {
                offered = true;
                Ok(())
            }),
            0
        );
        assert!(!offered, "a cancelled run never offers a reboot");
    }

    fn interrupts(signals: Arc<Notify>) -> impl FnMut() -> BoxedInterrupt {
        move || {
            let signals = signals.clone();
            Box::pin(async move {
                signals.notified().await;
                Ok(())
            })
        }
    }

    type BoxedInterrupt = std::pin::Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>;

    #[tokio::test]
    async fn first_interrupt_cancels_second_aborts() {
        let signals = Arc::new(Notify::new());
        let token = CancelToken::new();
        let watcher = tokio::spawn(watch_interrupts(token.clone(), interrupts(signals.clone())));

        signals.notify_one();
        timeout(Duration::from_secs(5), async {
            while !token.is_cancelled() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!watcher.is_finished());

        signals.notify_one();
        let aborted = timeout(Duration::from_secs(5), watcher).await.unwrap().unwrap();
        assert!(aborted);
    }

    #[tokio::test]
    async fn missing_signal_listener_never_cancels() {
        let token = CancelToken::new();
        let aborted = watch_interrupts(token.clone(), || async {
            Err(std::io::Error::other("no signal handler"))
        })
        .await;

        assert!(!aborted);
        assert!(!token.is_cancelled());
    }
}
