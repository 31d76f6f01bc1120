use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::{AptLayout, RepoError, RepoManager};
use crate::common::CommandExecutor;
use crate::common::privilege;
use crate::config::{Config, RepositoryConfig};
use crate::package::AptBackend;
use crate::ui::prelude::*;

#[derive(Subcommand, Debug, Clone)]
pub enum RepoCommands {
    /// Register repositories (default: every configured fallback) and refresh apt
    Add {
        /// Repository names from the config
        names: Vec<String>,
        /// Print what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove the sources entry, pin and key of repositories
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// List configured repositories and whether they are registered
    List,
}

pub async fn handle_repo_command(config: &Config, command: RepoCommands) -> Result<()> {
    match command {
        RepoCommands::Add { names, dry_run } => add(config, &names, dry_run).await,
        RepoCommands::Remove { names, dry_run } => remove(&names, dry_run),
        RepoCommands::List => {
            list(config, &AptLayout::system());
            Ok(())
        }
    }
}

fn select<'a>(config: &'a Config, names: &[String]) -> Result<Vec<&'a RepositoryConfig>> {
    if names.is_empty() {
        return Ok(config.fallback_repositories()?);
    }
    names
        .iter()
        .map(|name| {
            config
                .repository(name)
                .ok_or_else(|| RepoError::Unknown(name.clone()).into())
        })
        .collect()
}

async fn add(config: &Config, names: &[String], dry_run: bool) -> Result<()> {
    if !dry_run {
        privilege::require_root()?;
    }
    let repos = select(config, names)?;
    if repos.is_empty() {
        emit(
            Level::Info,
            "repo.add.none",
            &format!("{} No repositories to add", char::from(NerdFont::Info)),
            None,
        );
        return Ok(());
    }

    let executor = CommandExecutor::new(dry_run);
    let registration = RepoManager::new(AptLayout::system(), executor)
        .register(&repos)
        .await?;

    if registration.is_empty() && !dry_run {
        emit(
            Level::Info,
            "repo.add.unchanged",
            &format!("{} Repositories already registered", char::from(NerdFont::Check)),
            None,
        );
        return Ok(());
    }

    if let Err(e) = AptBackend::new(executor).refresh() {
        registration.rollback_with_warnings();
        return Err(e);
    }

    emit(
        Level::Success,
        "repo.add.done",
        &format!(
            "{} Registered {}",
            char::from(NerdFont::Check),
            repos.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(", ")
        ),
        None,
    );
    Ok(())
}

fn remove(names: &[String], dry_run: bool) -> Result<()> {
    if !dry_run {
        privilege::require_root()?;
    }
    let executor = CommandExecutor::new(dry_run);
    let manager = RepoManager::new(AptLayout::system(), executor);

    let mut failures = 0;
    for name in names {
        match manager.remove(name) {
            Ok(removed) if removed.is_empty() && !dry_run => emit(
                Level::Info,
                "repo.remove.absent",
                &format!("{} {} was not registered", char::from(NerdFont::Info), name),
                None,
            ),
            Ok(removed) => {
                for path in removed {
                    emit(
                        Level::Success,
                        "repo.remove.file",
                        &format!("{} Removed {}", char::from(NerdFont::Trash), path.display()),
                        None,
                    );
                }
            }
            Err(e) => {
                failures += 1;
                emit(
                    Level::Warn,
                    "repo.remove.failed",
                    &format!("{} {}", char::from(NerdFont::Warning), e),
                    None,
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} repositories could not be fully removed");
    }
    if !dry_run {
        AptBackend::new(executor).refresh()?;
    }
    Ok(())
}

fn list(config: &Config, layout: &AptLayout) {
    if config.repositories.is_empty() {
        emit(
            Level::Info,
            "repo.list.empty",
            &format!("{} No repositories configured", char::from(NerdFont::Info)),
            None,
        );
        return;
    }

    for repo in &config.repositories {
        let registered = layout.is_registered(&repo.name);
        let fallback = config.install.fallbacks.contains(&repo.name);
        let status = if registered {
            "registered".green()
        } else {
            "not registered".yellow()
        };
        emit(
            Level::Info,
            "repo.list.entry",
            &format!(
                "{} {} ({} {}, pin {}){} - {}",
                char::from(NerdFont::Package),
                repo.name.bold(),
                repo.suite,
                repo.components.join(" "),
                repo.pin_priority,
                if fallback { " [fallback]" } else { "" },
                status
            ),
            Some(serde_json::json!({
                "name": repo.name,
                "suite": repo.suite,
                "registered": registered,
                "fallback": fallback,
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_defaults_to_fallbacks() {
        let config = Config::default();
        let repos = select(&config, &[]).unwrap();
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, config.install.fallbacks.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn select_rejects_unknown_names() {
        let config = Config::default();
        let err = select(&config, &["ppa-nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("ppa-nope"));
    }
}
