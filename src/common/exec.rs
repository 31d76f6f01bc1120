//! Command execution with a dry-run mode.
//!
//! Every command that mutates the system goes through [`CommandExecutor`] so
//! that `--dry-run` prints the exact command line instead of running it.

use anyhow::{Context, Result};
use std::process::Command;

use crate::common::shell::display_command;
use crate::ui::prelude::*;

#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    pub dry_run: bool,
}

impl CommandExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Run with inherited stdio. Non-zero exit is an error.
    pub fn run(&self, command: &mut Command) -> Result<()> {
        let line = display_command(command);
        if self.dry_run {
            self.print_dry_run(&line);
            return Ok(());
        }

        emit(Level::Debug, "exec.run", &format!("$ {line}"), None);
        let status = command
            .status()
            .with_context(|| format!("spawning `{line}`"))?;
        if !status.success() {
            anyhow::bail!(
                "Command failed ({}): {}",
                status
                    .code()
                    .map(|c| format!("exit code {c}"))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                line
            );
        }
        Ok(())
    }

    /// Announce a filesystem mutation. Returns true when the caller should skip it.
    pub fn skip_file_operation(&self, description: &str) -> bool {
        if self.dry_run {
            self.print_dry_run(description);
            return true;
        }
        emit(Level::Debug, "exec.file", description, None);
        false
    }

    fn print_dry_run(&self, line: &str) {
        emit(
            Level::Info,
            "exec.dry_run",
            &format!("[DRY RUN] {line}"),
            Some(serde_json::json!({ "command": line })),
        );
    }
}
