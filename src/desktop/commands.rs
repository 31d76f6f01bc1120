use anyhow::Result;
use clap::Subcommand;

use super::{DesktopContext, GSettings};
use crate::common::{CommandExecutor, StepReport};
use crate::config::Config;
use crate::package::AptBackend;
use crate::provision;
use crate::ui::prelude::*;

#[derive(Subcommand, Debug, Clone)]
pub enum DesktopCommands {
    /// Apply the configured font, GNOME settings and favorites
    Apply {
        #[arg(long)]
        dry_run: bool,
    },
    /// Pin desktop files to the dock
    Pin {
        /// Desktop file ids, e.g. code.desktop
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

/// Returns the step reports so the caller can print them like a run.
pub fn handle_desktop_command(
    config: &Config,
    command: DesktopCommands,
) -> Result<Vec<StepReport>> {
    match command {
        DesktopCommands::Apply { dry_run } => {
            let apt = AptBackend::new(CommandExecutor::new(dry_run));
            Ok(provision::run_desktop(config, &apt, &[]))
        }
        DesktopCommands::Pin { ids, dry_run } => {
            let ctx = DesktopContext::detect()?;
            let changed = GSettings::new(&ctx, CommandExecutor::new(dry_run)).pin(&ids)?;
            if !changed {
                emit(
                    Level::Info,
                    "desktop.pin.unchanged",
                    &format!(
                        "{} Already pinned: {}",
                        char::from(NerdFont::Check),
                        ids.join(", ")
                    ),
                    None,
                );
            }
            Ok(Vec::new())
        }
    }
}
