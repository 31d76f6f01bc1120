//! GNOME session configuration for the user who invoked `sudo startup`.

pub mod commands;
pub mod favorites;
pub mod gsettings;
pub mod tweaks;

pub use gsettings::GSettings;

use anyhow::{Context, Result};
use nix::unistd::{Uid, User};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::common::privilege;

/// The real user's desktop session, captured once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopContext {
    user: String,
    home: PathBuf,
    bus_address: String,
    /// Commands must switch to `user` before touching the session
    switch_user: bool,
}

impl DesktopContext {
    pub fn detect() -> Result<Self> {
        let elevated = privilege::is_root();
        let sudo_user = std::env::var("SUDO_USER").ok();

        match resolve_user(elevated, sudo_user.as_deref()) {
            Some(name) => {
                let user = User::from_name(&name)
                    .with_context(|| format!("looking up user {name}"))?
                    .with_context(|| format!("user {name} does not exist"))?;
                Ok(Self::new(&user.name, user.uid.as_raw(), &user.dir, elevated))
            }
            None => {
                let user = User::from_uid(Uid::current())
                    .context("looking up the current user")?
                    .context("current user has no passwd entry")?;
                Ok(Self::new(&user.name, user.uid.as_raw(), &user.dir, false))
            }
        }
    }

    pub fn new(user: &str, uid: u32, home: &Path, switch_user: bool) -> Self {
        Self {
            user: user.to_string(),
            home: home.to_path_buf(),
            bus_address: format!("unix:path=/run/user/{uid}/bus"),
            switch_user,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn bus_address(&self) -> &str {
        &self.bus_address
    }

    /// Full argument vector running `program` inside the user's session
    pub fn argv(&self, program: &str, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 6);
        if self.switch_user {
            argv.extend([
                "sudo".to_string(),
                "-u".to_string(),
                self.user.clone(),
                "env".to_string(),
                format!("DBUS_SESSION_BUS_ADDRESS={}", self.bus_address),
                format!("HOME={}", self.home.display()),
            ]);
        }
        argv.push(program.to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    pub fn command(&self, program: &str, args: &[&str]) -> Command {
        let argv = self.argv(program, args);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }
}

/// The session owner: `SUDO_USER` when elevated through sudo, else the current user.
fn resolve_user(elevated: bool, sudo_user: Option<&str>) -> Option<String> {
    if !elevated {
        return None;
    }
    sudo_user
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "root")
        .map(str::to_string)
}
