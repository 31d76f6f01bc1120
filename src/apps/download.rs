use anyhow::{Context, Result};
use futures_util::StreamExt;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::common::progress::{create_download_bar, finish_with_failure, finish_with_success};
use crate::ui::prelude::*;

const ARCHIVE_LINK: &str = r#"https://[^\s'"<>]+\.tar\.xz"#;

/// HTTP downloads with a fixed number of attempts and linear backoff.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    attempts: u32,
    backoff_unit: Duration,
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Download `url` to `dest`, waiting `(1 + attempt)` backoff units between tries.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            emit(
                Level::Info,
                "apps.download",
                &format!(
                    "{} Downloading (attempt {}/{}): {}",
                    char::from(NerdFont::Download),
                    attempt,
                    self.attempts,
                    url
                ),
                None,
            );

            match self.download_once(url, dest).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    emit(
                        Level::Warn,
                        "apps.download.retry",
                        &format!("{} Download failed: {e:#}", char::from(NerdFont::Warning)),
                        None,
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.backoff_unit * (1 + attempt)).await;
            }
        }

        let _ = tokio::fs::remove_file(dest).await;
        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no download attempts configured"))
            .context(format!("Failed to download {} after {} attempts", url, self.attempts)))
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("server returned status: {}", response.status());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());
        let pb = create_download_bar(name.clone(), response.content_length());

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    finish_with_failure(pb);
                    return Err(e).context("connection interrupted");
                }
            };
            file.write_all(&chunk)
                .await
                .with_context(|| format!("writing {}", dest.display()))?;
            pb.inc(chunk.len() as u64);
        }
        file.flush().await.context("flushing download")?;

        finish_with_success(pb, format!("Saved {name}"));
        Ok(())
    }

    /// Resolve an archive URL from a download page.
    ///
    /// A redirect that already lands on a `.tar.xz` wins; otherwise the page is
    /// searched with `pattern`, then for any https `.tar.xz` link.
    pub async fn discover_link(&self, page_url: &str, pattern: &str) -> Result<String> {
        let response = self
            .client
            .get(page_url)
            .send()
            .await
            .with_context(|| format!("fetching {page_url}"))?;

        let final_url = response.url().to_string();
        if final_url.ends_with(".tar.xz") {
            return Ok(final_url);
        }

        let page = response
            .text()
            .await
            .with_context(|| format!("reading {page_url}"))?;
        find_archive_link(&page, pattern)?
            .with_context(|| format!("no archive link found on {page_url}"))
    }
}

pub fn find_archive_link(page: &str, pattern: &str) -> Result<Option<String>> {
    let preferred = Regex::new(pattern).context("invalid discovery pattern")?;
    if let Some(found) = preferred.find(page) {
        return Ok(Some(found.as_str().to_string()));
    }
    let any_archive = Regex::new(ARCHIVE_LINK).context("invalid archive pattern")?;
    Ok(any_archive.find(page).map(|m| m.as_str().to_string()))
}

/// Last path segment of `url`, ignoring query and fragment
pub fn file_name_for(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    (!name.is_empty() && !name.contains(':')).then(|| name.to_string())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("reading {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        anyhow::bail!(
            "checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        );
    }
    emit(
        Level::Success,
        "apps.checksum.verified",
        &format!("{} Checksum verified", char::from(NerdFont::Check)),
        None,
    );
    Ok(())
}
