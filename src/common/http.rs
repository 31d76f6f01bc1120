use anyhow::{Context, Result};
use std::time::Duration;

/// Browser-like, since some download pages refuse unknown agents
pub fn user_agent() -> String {
    format!(
        "Mozilla/5.0 (X11; Linux x86_64) startup/{}",
        env!("CARGO_PKG_VERSION")
    )
}

pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")
}
