//! `startup.toml`: everything a provisioning run does, with defaults that
//! reproduce the stock Kali desktop setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::common::paths;
use crate::package::{PackageSpec, RepairPolicy, SourceRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("fallback source '{0}' is not a configured repository")]
    UnknownFallback(String),
    #[error("repository '{0}' is defined more than once")]
    DuplicateRepository(String),
    #[error("repository name '{0}' must be a plain file name")]
    InvalidRepositoryName(String),
    #[error("repository '{0}' has no components")]
    NoComponents(String),
    #[error("app '{0}' needs a `{1}`")]
    MissingAppField(String, &'static str),
    #[error("app '{name}' has an invalid sha256 '{value}'")]
    InvalidChecksum { name: String, value: String },
    #[error("app '{name}' has an invalid discovery pattern: {reason}")]
    InvalidPattern { name: String, reason: String },
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_true")]
    pub prompt_reboot: bool,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default = "default_repositories")]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
    #[serde(default = "default_apps")]
    pub apps: Vec<AppConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prompt_reboot: true,
            install: InstallConfig::default(),
            repositories: default_repositories(),
            desktop: DesktopConfig::default(),
            theme: ThemeConfig::default(),
            apps: default_apps(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstallConfig {
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    /// Repository names tried after the default sources, in order
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub repair_policy: RepairPolicy,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            fallbacks: default_fallbacks(),
            repair_policy: RepairPolicy::default(),
        }
    }
}

fn default_packages() -> Vec<String> {
    [
        "nmap",
        "sqlmap",
        "nikto",
        "gobuster",
        "hydra",
        "john",
        "wireshark",
        "metasploit-framework",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_fallbacks() -> Vec<String> {
    vec!["kali-rolling".to_string()]
}

fn default_pin_priority() -> i32 {
    100
}

/// A foreign apt repository, pinned below the default sources.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub name: String,
    pub uri: String,
    pub suite: String,
    pub components: Vec<String>,
    /// Armored signing key, stored under `/etc/apt/keyrings`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_url: Option<String>,
    #[serde(default = "default_pin_priority")]
    pub pin_priority: i32,
}

impl RepositoryConfig {
    pub fn source(&self) -> SourceRef {
        SourceRef::Repository {
            name: self.name.clone(),
            release: self.suite.clone(),
        }
    }
}

fn default_repositories() -> Vec<RepositoryConfig> {
    vec![RepositoryConfig {
        name: "kali-rolling".to_string(),
        uri: "http://http.kali.org/kali".to_string(),
        suite: "kali-rolling".to_string(),
        components: ["main", "contrib", "non-free", "non-free-firmware"]
            .into_iter()
            .map(String::from)
            .collect(),
        key_url: Some("https://archive.kali.org/archive-key.asc".to_string()),
        pin_priority: default_pin_priority(),
    }]
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FontConfig {
    pub family: String,
    pub size: u32,
    /// Package providing the family when `fc-list` does not know it
    pub package: String,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            family: "DejaVu Serif Condensed".to_string(),
            size: 10,
            package: "fonts-dejavu-core".to_string(),
        }
    }
}

impl FontConfig {
    /// Value for `org.gnome.desktop.interface font-name`
    pub fn setting(&self) -> String {
        format!("{} {}", self.family, self.size)
    }
}

/// One `gsettings set` call. `value` is passed verbatim (GVariant text).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SettingConfig {
    pub schema: String,
    pub key: String,
    pub value: String,
}

impl SettingConfig {
    fn new(schema: &str, key: &str, value: &str) -> Self {
        Self {
            schema: schema.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DesktopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Desktop-file ids always pinned to the dock
    #[serde(default)]
    pub favorites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<FontConfig>,
    #[serde(default = "default_settings")]
    pub settings: Vec<SettingConfig>,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            font: Some(FontConfig::default()),
            settings: default_settings(),
            favorites: Vec::new(),
        }
    }
}

fn default_settings() -> Vec<SettingConfig> {
    const INTERFACE: &str = "org.gnome.desktop.interface";
    const BACKGROUND: &str = "org.gnome.desktop.background";
    const DOCK: &str = "org.gnome.shell.extensions.dash-to-dock";

    vec![
        SettingConfig::new(INTERFACE, "text-scaling-factor", "0.95"),
        SettingConfig::new(BACKGROUND, "picture-options", "'zoom'"),
        SettingConfig::new(DOCK, "dock-position", "'LEFT'"),
        SettingConfig::new(DOCK, "autohide", "true"),
        SettingConfig::new(DOCK, "animation-time", "0.0"),
        SettingConfig::new(DOCK, "hide-delay", "0.0"),
        SettingConfig::new(DOCK, "pressure-threshold", "0.0"),
        SettingConfig::new(DOCK, "dash-max-icon-size", "20"),
    ]
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GrubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// grub.cfg inside the assets directory
    pub config_file: String,
    /// Theme directory inside the assets directory
    pub theme_dir: String,
    /// Name of the installed theme under `themes/`
    pub theme_name: String,
}

impl Default for GrubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config_file: "grub.cfg".to_string(),
            theme_dir: "kali".to_string(),
            theme_name: "kali".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WallpaperMapping {
    /// File inside the assets wallpaper directory
    pub source: String,
    /// File name inside the backgrounds directory
    pub target: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WallpaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source_dir: String,
    pub backgrounds_dir: String,
    /// Files backed up without a replacement
    #[serde(default)]
    pub backup_extra: Vec<String>,
    pub mappings: Vec<WallpaperMapping>,
}

impl Default for WallpaperConfig {
    fn default() -> Self {
        let mappings = [
            ("20-wallpaper.svg", "login.svg"),
            ("12-wallpaper.png", "kali-maze-16x9.jpg"),
            ("1-wallpaper.png", "kali-tiles-16x9.jpg"),
            ("2-wallpaper.png", "kali-waves-16x9.png"),
            ("3-wallpaper.png", "kali-oleo-16x9.png"),
            ("4-wallpaper.png", "kali-tiles-purple-16x9.jpg"),
        ]
        .into_iter()
        .map(|(source, target)| WallpaperMapping {
            source: source.to_string(),
            target: target.to_string(),
        })
        .collect();

        Self {
            enabled: true,
            source_dir: "wallpaper".to_string(),
            backgrounds_dir: "/usr/share/backgrounds/kali".to_string(),
            mappings,
            backup_extra: vec!["login-blurred".to_string()],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ThemeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Git URL of the assets; when unset `assets_dir` must already exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<String>,
    /// Filesystem root the theme is installed under
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub grub: GrubConfig,
    #[serde(default)]
    pub wallpapers: WallpaperConfig,
}

fn default_root() -> String {
    "/".to_string()
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            assets_repo: Some("https://github.com/Abr-ahamis/startup.git".to_string()),
            assets_branch: None,
            assets_dir: None,
            root: default_root(),
            grub: GrubConfig::default(),
            wallpapers: WallpaperConfig::default(),
        }
    }
}

impl ThemeConfig {
    pub fn assets_path(&self) -> Result<PathBuf> {
        match &self.assets_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::default_assets_dir(),
        }
    }

    pub fn root_path(&self) -> PathBuf {
        paths::expand(&self.root)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    /// Debian package installed with dpkg
    Deb,
    /// Archive extracted into `install_dir`
    Tarball,
    /// Installer script run with `sh`
    Script,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub kind: AppKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Treat `url` as a page and look for the archive link with this regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
    /// Executable inside `install_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// First installable name wins (package names vary between releases)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<String>,
    /// Installed after the app itself
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub desktop_files: Vec<String>,
    /// Environment for installer scripts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl AppConfig {
    fn new(name: &str, kind: AppKind, url: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            url: url.to_string(),
            sha256: None,
            discover: None,
            install_dir: None,
            binary: None,
            env: BTreeMap::new(),
            one_of: Vec::new(),
            packages: Vec::new(),
            desktop_files: Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == AppKind::Tarball && self.install_dir.is_none() {
            return Err(ConfigError::MissingAppField(self.name.clone(), "install_dir"));
        }
        if let Some(sum) = &self.sha256 {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::InvalidChecksum {
                    name: self.name.clone(),
                    value: sum.clone(),
                });
            }
        }
        if let Some(pattern) = &self.discover {
            regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_apps() -> Vec<AppConfig> {
    let mut telegram = AppConfig::new(
        "telegram",
        AppKind::Tarball,
        "https://telegram.org/dl/desktop/linux",
    );
    telegram.discover =
        Some(r"https://telegram\.org/dl/desktop/linux/tsetup\.\d+\.\d+\.\d+\.tar\.xz".to_string());
    telegram.install_dir = Some("/opt/Telegram".to_string());
    telegram.binary = Some("Telegram".to_string());

    let mut protonvpn = AppConfig::new(
        "protonvpn",
        AppKind::Deb,
        "https://repo.protonvpn.com/debian/dists/stable/main/binary-all/protonvpn-stable-release_1.0.8_all.deb",
    );
    protonvpn.sha256 =
        Some("0b14e71586b22e498eb20926c48c7b434b751149b1f2af9902ef1cfe6b03e180".to_string());
    protonvpn.one_of = strings(&[
        "proton-vpn-gnome-desktop",
        "protonvpn-gnome-desktop",
        "proton-vpn",
    ]);
    protonvpn.packages = strings(&[
        "libayatana-appindicator3-1",
        "gir1.2-ayatanaappindicator3-0.1",
        "gnome-shell-extension-appindicator",
    ]);

    let rustscan = AppConfig::new(
        "rustscan",
        AppKind::Deb,
        "https://github.com/RustScan/RustScan/releases/download/2.2.3/rustscan_2.2.3_amd64.deb",
    );

    let mut vscode = AppConfig::new(
        "vscode",
        AppKind::Deb,
        "https://code.visualstudio.com/sha/download?build=stable&os=linux-deb-x64",
    );
    vscode.desktop_files = strings(&["code.desktop"]);

    let mut brave = AppConfig::new("brave", AppKind::Script, "https://dl.brave.com/install.sh");
    brave.env.insert("CHANNEL".to_string(), "nightly".to_string());
    brave.desktop_files = strings(&[
        "brave-browser.desktop",
        "brave-browser-nightly.desktop",
        "brave.desktop",
    ]);

    vec![telegram, protonvpn, rustscan, vscode, brave]
}

impl Config {
    /// Load from `path`, or from the default location. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let cfg_path = match path {
            Some(p) => p.to_path_buf(),
            None => paths::default_config_file()?,
        };
        if !cfg_path.exists() {
            if path.is_some() {
                anyhow::bail!("config file {} does not exist", cfg_path.display());
            }
            return Ok(Config::default());
        }
        let s = fs::read_to_string(&cfg_path)
            .with_context(|| format!("reading config {}", cfg_path.display()))?;
        let c: Config = toml::from_str(&s)
            .with_context(|| format!("parsing config toml {}", cfg_path.display()))?;
        c.validate()?;
        Ok(c)
    }

    /// Write to `path` (overwrites), creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("creating config directory")?;
        }
        let toml = self.to_toml()?;
        fs::write(path, toml).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config to toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for repo in &self.repositories {
            if repo.name.is_empty()
                || repo.name.contains('/')
                || repo.name.starts_with('.')
                || repo.name.contains(char::is_whitespace)
            {
                return Err(ConfigError::InvalidRepositoryName(repo.name.clone()));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::DuplicateRepository(repo.name.clone()));
            }
            if repo.components.is_empty() {
                return Err(ConfigError::NoComponents(repo.name.clone()));
            }
        }

        for fallback in &self.install.fallbacks {
            if !seen.contains(fallback.as_str()) {
                return Err(ConfigError::UnknownFallback(fallback.clone()));
            }
        }

        for app in &self.apps {
            app.validate()?;
        }
        Ok(())
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Configured fallback repositories, in fallback order
    pub fn fallback_repositories(&self) -> Result<Vec<&RepositoryConfig>, ConfigError> {
        self.install
            .fallbacks
            .iter()
            .map(|name| {
                self.repository(name)
                    .ok_or_else(|| ConfigError::UnknownFallback(name.clone()))
            })
            .collect()
    }

    /// The default sources followed by every fallback
    pub fn sources(&self) -> Result<Vec<SourceRef>, ConfigError> {
        let mut sources = vec![SourceRef::Default];
        sources.extend(self.fallback_repositories()?.into_iter().map(RepositoryConfig::source));
        Ok(sources)
    }

    pub fn packages(&self) -> Vec<PackageSpec> {
        self.install.packages.iter().map(|p| PackageSpec::new(p.as_str())).collect()
    }
}
