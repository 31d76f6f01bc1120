use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Config with nothing outside the package loop, so dry runs stay local.
pub const MINIMAL_CONFIG: &str = r#"prompt_reboot = false
repositories = []
apps = []

[install]
packages = ["nmap", "sqlmap"]
fallbacks = []

[desktop]
enabled = false

[theme]
enabled = false
"#;

/// Isolated HOME and XDG directories for one test.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        for dir in ["home", "config", "data"] {
            std::fs::create_dir_all(temp_dir.path().join(dir))?;
        }
        Ok(Self { temp_dir })
    }

    pub fn home(&self) -> PathBuf {
        self.temp_dir.path().join("home")
    }

    pub fn config_home(&self) -> PathBuf {
        self.temp_dir.path().join("config")
    }

    pub fn data_home(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_home().join("startup").join("startup.toml")
    }

    pub fn journal_file(&self) -> PathBuf {
        self.data_home().join("startup").join("logs").join("install.jsonl")
    }

    /// Write a config file next to the temp dirs and return its path
    pub fn write_config(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
