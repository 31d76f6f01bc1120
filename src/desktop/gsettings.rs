use anyhow::{Context, Result};

use super::DesktopContext;
use super::favorites::FavoriteApps;
use crate::common::CommandExecutor;
use crate::ui::prelude::*;

const SHELL_SCHEMA: &str = "org.gnome.shell";
const FAVORITES_KEY: &str = "favorite-apps";

/// `gsettings` in the real user's session.
pub struct GSettings<'a> {
    ctx: &'a DesktopContext,
    executor: CommandExecutor,
}

impl<'a> GSettings<'a> {
    pub fn new(ctx: &'a DesktopContext, executor: CommandExecutor) -> Self {
        Self { ctx, executor }
    }

    pub fn set(&self, schema: &str, key: &str, value: &str) -> Result<()> {
        let mut cmd = self.ctx.command("gsettings", &["set", schema, key, value]);
        self.executor
            .run(&mut cmd)
            .with_context(|| format!("setting {schema} {key}"))
    }

    /// Read a key. Read-only, so it also runs in dry-run mode.
    pub fn get(&self, schema: &str, key: &str) -> Result<String> {
        let argv = self.ctx.argv("gsettings", &["get", schema, key]);
        let value = duct::cmd(&argv[0], &argv[1..])
            .stderr_capture()
            .read()
            .with_context(|| format!("reading {schema} {key}"))?;
        Ok(value.trim().to_string())
    }

    pub fn favorites(&self) -> Result<FavoriteApps> {
        let raw = self.get(SHELL_SCHEMA, FAVORITES_KEY)?;
        FavoriteApps::parse(&raw).context("parsing favorite-apps")
    }

    /// Append `ids` to the dock. Writes only when something was missing.
    pub fn pin<S: AsRef<str>>(&self, ids: &[S]) -> Result<bool> {
        let mut favorites = self.favorites()?;
        let mut changed = false;
        for id in ids {
            changed |= favorites.insert(id.as_ref());
        }

        if !changed {
            emit(
                Level::Debug,
                "desktop.favorites.unchanged",
                "Favorites already contain every requested app",
                None,
            );
            return Ok(false);
        }

        self.set(SHELL_SCHEMA, FAVORITES_KEY, &favorites.to_gvariant())?;
        emit(
            Level::Success,
            "desktop.favorites.updated",
            &format!(
                "{} Dock now holds {} apps: {}",
                char::from(NerdFont::Star),
                favorites.len(),
                favorites
            ),
            None,
        );
        Ok(true)
    }
}
