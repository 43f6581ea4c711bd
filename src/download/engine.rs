use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::REFERER;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    DownloadProgress, MediaTransfer, ProgressTracker, SkipReason, TransferOutcome, TransferRequest,
};
use crate::browser::CookieSet;
use crate::error::TransferError;

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub connect_timeout: Duration,
    /// Longest wait for the next chunk of the body
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(300),
            user_agent: concat!("coursedl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Streams media to disk with the browser's cookies attached.
///
/// A destination that already holds data is left alone, which is what makes
/// re-running a batch pick up where it stopped. There is no retry here: a
/// failed lesson is fetched again by the next run.
pub struct TransferEngine {
    client: Client,
    read_timeout: Duration,
    progress_sender: Option<mpsc::UnboundedSender<DownloadProgress>>,
}

impl TransferEngine {
    pub fn new(cookies: &CookieSet, options: TransferOptions) -> Result<Self> {
        let client = Client::builder()
            .cookie_provider(Arc::new(cookies.to_jar()))
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            read_timeout: options.read_timeout,
            progress_sender: None,
        })
    }

    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<DownloadProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    fn emit(&self, event: DownloadProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(event);
        }
    }

    async fn stream_to_disk(&self, id: &str, request: &TransferRequest) -> Result<u64, TransferError> {
        if let Some(parent) = request.destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut req_builder = self.client.get(&request.media_url);
        if let Some(referer) = &request.referer {
            req_builder = req_builder.header(REFERER, referer);
        }

        // A server that accepts but never answers counts as stalled too.
        let response = tokio::time::timeout(self.read_timeout, req_builder.send())
            .await
            .map_err(|_| TransferError::Stalled(self.read_timeout.as_secs()))??;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status));
        }

        let total_size = response.content_length();
        let part_path = part_path_for(&request.destination);
        let mut file = File::create(&part_path).await?;

        let mut downloaded: u64 = 0;
        let mut last_progress_update = Instant::now();
        let mut last_bytes = 0;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| TransferError::Stalled(self.read_timeout.as_secs()))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if last_progress_update.elapsed() >= PROGRESS_UPDATE_INTERVAL {
                let elapsed = last_progress_update.elapsed().as_secs_f64();
                let speed_bps = ((downloaded - last_bytes) as f64 / elapsed) as u64;
                self.emit(DownloadProgress::Progress {
                    id: id.to_string(),
                    bytes_downloaded: downloaded,
                    total_bytes: total_size.unwrap_or(0),
                    progress_percent: ProgressTracker::percent(downloaded, total_size.unwrap_or(0)),
                    speed_bps,
                });
                last_progress_update = Instant::now();
                last_bytes = downloaded;
            }
        }

        if let Some(expected) = total_size {
            if downloaded < expected {
                return Err(TransferError::Truncated {
                    received: downloaded,
                    expected,
                });
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&part_path, &request.destination).await?;
        Ok(downloaded)
    }
}

#[async_trait]
impl MediaTransfer for TransferEngine {
    async fn transfer(&self, request: TransferRequest) -> TransferOutcome {
        let id = request.lesson.name.clone();

        if has_content(&request.destination).await {
            debug!("Already downloaded: {}", request.destination.display());
            self.emit(DownloadProgress::Skipped {
                id,
                reason: SkipReason::AlreadyExists.to_string(),
            });
            return TransferOutcome::skipped(request.lesson, SkipReason::AlreadyExists);
        }

        self.emit(DownloadProgress::Started {
            id: id.clone(),
            url: request.media_url.clone(),
            output_path: request.destination.clone(),
        });
        debug!("Downloading {} -> {}", request.media_url, request.destination.display());

        match self.stream_to_disk(&id, &request).await {
            Ok(bytes) => {
                debug!(
                    "Saved {} ({})",
                    request.destination.display(),
                    ProgressTracker::format_bytes(bytes)
                );
                self.emit(DownloadProgress::Completed {
                    id,
                    bytes_downloaded: bytes,
                });
                TransferOutcome::success(request.lesson, bytes)
            }
            Err(e) => {
                debug!("Transfer of '{}' failed: {}", request.lesson.name, e);
                remove_partial(&part_path_for(&request.destination)).await;
                self.emit(DownloadProgress::Failed {
                    id,
                    error: e.to_string(),
                });
                TransferOutcome::failed(request.lesson, e.to_string())
            }
        }
    }
}

async fn has_content(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}

/// Bytes land next to the destination and are renamed into place only once
/// the whole body has arrived.
pub fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}
