use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for startup

const APP_DIR: &str = "startup";

/// Directory holding `startup.toml`
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join(APP_DIR);
    Ok(config_dir)
}

pub fn default_config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("startup.toml"))
}

/// Main data directory, created on demand
pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
            home.join(".local/share")
        })
        .join(APP_DIR);

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory at {}", data_dir.display()))?;

    Ok(data_dir)
}

pub fn logs_dir() -> Result<PathBuf> {
    let logs_dir = data_dir()?.join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating logs directory at {}", logs_dir.display()))?;
    Ok(logs_dir)
}

pub fn downloads_dir() -> Result<PathBuf> {
    let downloads = data_dir()?.join("downloads");
    std::fs::create_dir_all(&downloads)
        .with_context(|| format!("creating downloads directory at {}", downloads.display()))?;
    Ok(downloads)
}

/// Default checkout location for theme assets (not created here, git clones into it)
pub fn default_assets_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("assets"))
}

pub fn completions_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("completions")
}

/// Expand `~` and environment variables in a configured path
pub fn expand(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_keeps_absolute_paths() {
        assert_eq!(expand("/opt/Telegram"), PathBuf::from("/opt/Telegram"));
    }

    #[test]
    fn expand_resolves_tilde() {
        let expanded = expand("~/wallpapers");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("wallpapers"));
    }
}
