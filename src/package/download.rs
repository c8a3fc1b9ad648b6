//! Fetching package archives and installers.

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::error::{PackageError, Result};
use crate::ui::prelude::*;

pub struct Downloader {
    client: reqwest::Client,
    token: CancellationToken,
    dry_run: bool,
}

/// Last path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .unwrap_or("download")
        .to_string()
}

impl Downloader {
    pub fn new(timeout: Duration, token: CancellationToken, dry_run: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("panelctl/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PackageError::Download {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            token,
            dry_run,
        })
    }

    /// Download `url` to `dest`. `file://` URLs are copied from disk.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if self.dry_run {
            emit(
                Level::Info,
                "download.dry_run",
                &format!("[DRY RUN] download {} -> {}", url, dest.display()),
                None,
            );
            return Ok(());
        }

        emit(
            Level::Info,
            "download.start",
            &format!("Downloading {}", url),
            None,
        );

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PackageError::io(format!("creating {}", parent.display()), e))?;
        }

        let transfer = async {
            if let Some(local) = url.strip_prefix("file://") {
                tokio::fs::copy(local, dest)
                    .await
                    .map(|_| ())
                    .map_err(|e| PackageError::Download {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })
            } else {
                self.stream_to_file(url, dest).await
            }
        };

        tokio::select! {
            result = transfer => result,
            _ = self.token.cancelled() => Err(PackageError::Cancelled),
        }
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let failed = |reason: String| PackageError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("server responded with {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PackageError::io(format!("creating {}", dest.display()), e))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PackageError::io(format!("writing {}", dest.display()), e))?;
        }
        file.flush()
            .await
            .map_err(|e| PackageError::io(format!("writing {}", dest.display()), e))?;
        Ok(())
    }

    /// Try each URL in turn and return the path of the first successful
    /// download inside `dir`.
    pub async fn fetch_first(&self, urls: &[String], dir: &Path) -> Result<PathBuf> {
        let mut last_error = None;
        for url in urls {
            let dest = dir.join(file_name_from_url(url));
            match self.fetch(url, &dest).await {
                Ok(()) => return Ok(dest),
                Err(PackageError::Cancelled) => return Err(PackageError::Cancelled),
                Err(e) => {
                    emit(
                        Level::Warn,
                        "download.failed",
                        &format!("Download from {} failed: {}", url, e),
                        None,
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PackageError::Download {
            url: String::new(),
            reason: "no download URLs configured".to_string(),
        }))
    }
}

/// Hex-encoded SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| PackageError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| PackageError::io(format!("reading {}", path.display()), e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// `tar` flags that unpack `path`, or `None` for plain files such as
/// installers and single binaries.
pub fn archive_kind(path: &Path) -> Option<&'static [&'static str]> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(&["-xzf"])
    } else if name.ends_with(".tar.xz") {
        Some(&["-xJf"])
    } else if name.ends_with(".tar") || name.ends_with(".zip") {
        // bsdtar (shipped with Windows 10+) reads zip archives
        Some(&["-xf"])
    } else {
        None
    }
}
