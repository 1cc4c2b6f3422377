//! Cancellable streaming downloader.
//!
//! [`Downloader::start`] spawns one task that performs a single HTTP GET,
//! tees the body into a [`Sink`] and pushes progress fractions into a
//! [`ProgressSender`] whenever the content length is known. The task reports
//! exactly once through the [`DownloadTask`] completion signal, after the
//! response body and any file handle have been released.
//!
//! A file sink is removed again when the transfer it was created by does not
//! complete. A transfer that fails before opening its sink leaves whatever
//! was already at that path alone.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{Progress, ProgressSender};
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Upper bound for preallocating memory sinks from `Content-Length`.
const PREALLOCATE_LIMIT: u64 = 64 * 1024 * 1024;

// ============================================================================
// Download Types
// ============================================================================

/// Where downloaded bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// Collect the body in a growable buffer.
    Memory,
    /// Stream the body into a file created through the filesystem abstraction.
    File(PathBuf),
}

/// Length of the response body as announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    Known(u64),
    Unknown,
}

/// A completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Downloaded {
    bytes: u64,
    data: Vec<u8>,
}

impl Downloaded {
    /// Number of bytes received.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The downloaded body. Always empty for file sinks.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// How a transfer ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finished {
    Completed(Downloaded),
    Canceled,
}

// ============================================================================
// Downloader
// ============================================================================

/// Starts HTTP downloads. Cheap to clone.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    fs: Arc<dyn FileSystem>,
}

impl Downloader {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self::with_client(reqwest::Client::new(), fs)
    }

    pub fn with_client(client: reqwest::Client, fs: Arc<dyn FileSystem>) -> Self {
        Self { client, fs }
    }

    /// Starts downloading `url` into `sink` on a background task.
    ///
    /// Progress is pushed to `progress` only while the content length is
    /// known. Cancelling `cancel` ends the transfer with [`Finished::Canceled`].
    pub fn start(
        &self,
        url: &str,
        sink: Sink,
        progress: Option<ProgressSender>,
        cancel: CancellationToken,
    ) -> DownloadTask {
        let (done_tx, done_rx) = oneshot::channel();
        let client = self.client.clone();
        let fs = Arc::clone(&self.fs);
        let task_url = url.to_string();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut created = None;
            let result = transfer(
                &client,
                fs.as_ref(),
                &task_url,
                sink,
                progress,
                &task_cancel,
                &mut created,
            )
            .await;

            if let Some(path) = created {
                if !matches!(result, Ok(Finished::Completed(_))) {
                    discard_partial(fs.as_ref(), &path);
                }
            }

            match &result {
                Ok(Finished::Completed(done)) => {
                    info!("Download complete: {} bytes from {}", done.bytes(), task_url)
                }
                Ok(Finished::Canceled) => info!("Download of {} canceled", task_url),
                Err(e) => debug!("Download of {} failed: {}", task_url, e),
            }

            // The receiver may already be gone if the caller lost interest.
            let _ = done_tx.send(result);
        });

        DownloadTask {
            url: url.to_string(),
            cancel,
            completion: done_rx,
        }
    }

    /// Downloads `url` into memory without progress reporting.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let task = self.start(url, Sink::Memory, None, CancellationToken::new());
        match task.finished().await? {
            Finished::Completed(done) => Ok(done.into_data()),
            Finished::Canceled => Err(anyhow!("download of {} was canceled", url).into()),
        }
    }
}

/// Handle to an in-flight transfer.
#[derive(Debug)]
pub struct DownloadTask {
    url: String,
    cancel: CancellationToken,
    completion: oneshot::Receiver<Result<Finished>>,
}

impl DownloadTask {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests cancellation. The completion signal still fires once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the completion signal.
    pub async fn finished(self) -> Result<Finished> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("download task for {} ended without reporting", self.url).into()),
        }
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Runs one GET. `created` is set to the sink path once the file exists.
async fn transfer(
    client: &reqwest::Client,
    fs: &dyn FileSystem,
    url: &str,
    sink: Sink,
    mut progress: Option<ProgressSender>,
    cancel: &CancellationToken,
    created: &mut Option<PathBuf>,
) -> Result<Finished> {
    info!("Downloading {}", url);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Finished::Canceled),
        response = client.get(url).send() => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(_) if cancel.is_cancelled() => return Ok(Finished::Canceled),
        Err(source) => {
            return Err(Error::Network {
                url: url.to_string(),
                source,
            })
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown error").to_string(),
        });
    }

    let length = parse_content_length(url, response.headers())?;
    debug!("Content-Length: {:?}", length);

    let mut writer = SinkWriter::open(fs, sink, length)?;
    if let SinkWriter::File { path, .. } = &writer {
        *created = Some(path.clone());
    }
    let mut tee = ProgressTee::new(length);
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Finished::Canceled),
            next = stream.next() => next,
        };

        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(_)) if cancel.is_cancelled() => return Ok(Finished::Canceled),
            Some(Err(source)) => {
                return Err(Error::Network {
                    url: url.to_string(),
                    source,
                })
            }
        };

        writer.write(&chunk)?;

        let mut receiver_gone = false;
        if let (Some(sender), Some(value)) = (progress.as_ref(), tee.record(chunk.len())) {
            let delivered = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Finished::Canceled),
                sent = sender.send(value) => sent.is_ok(),
            };
            receiver_gone = !delivered;
        }
        if receiver_gone {
            debug!("Progress receiver for {} went away", url);
            progress = None;
        }
    }

    Ok(Finished::Completed(writer.finish(tee.received())?))
}

/// Interprets the `Content-Length` header.
///
/// Absent means unknown; anything that is not a non-negative integer is an
/// error.
pub fn parse_content_length(url: &str, headers: &HeaderMap) -> Result<ContentLength> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(ContentLength::Unknown);
    };

    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(ContentLength::Known)
        .ok_or_else(|| Error::InvalidContentLength {
            url: url.to_string(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
}

fn discard_partial(fs: &dyn FileSystem, path: &Path) {
    match fs.remove_file(path) {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", path.display(), e),
    }
}

/// Counts received bytes and turns them into progress fractions.
#[derive(Debug)]
struct ProgressTee {
    total: ContentLength,
    received: u64,
}

impl ProgressTee {
    fn new(total: ContentLength) -> Self {
        Self { total, received: 0 }
    }

    /// Records `n` more bytes. Returns a fraction only when the total is known.
    fn record(&mut self, n: usize) -> Option<Progress> {
        self.received += n as u64;
        match self.total {
            ContentLength::Known(total) => Progress::fraction(self.received, total),
            ContentLength::Unknown => None,
        }
    }

    fn received(&self) -> u64 {
        self.received
    }
}

enum SinkWriter {
    Memory(Vec<u8>),
    File {
        path: PathBuf,
        file: Box<dyn Write + Send>,
    },
}

impl SinkWriter {
    fn open(fs: &dyn FileSystem, sink: Sink, length: ContentLength) -> Result<Self> {
        match sink {
            Sink::Memory => {
                let capacity = match length {
                    ContentLength::Known(n) => n.min(PREALLOCATE_LIMIT) as usize,
                    ContentLength::Unknown => 0,
                };
                Ok(Self::Memory(Vec::with_capacity(capacity)))
            }
            Sink::File(path) => {
                let file = fs.create(&path).map_err(|e| Error::io(&path, e))?;
                Ok(Self::File { path, file })
            }
        }
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        match self {
            Self::Memory(data) => {
                data.extend_from_slice(chunk);
                Ok(())
            }
            Self::File { path, file } => file.write_all(chunk).map_err(|e| Error::io(&*path, e)),
        }
    }

    fn finish(self, bytes: u64) -> Result<Downloaded> {
        match self {
            Self::Memory(data) => Ok(Downloaded { bytes, data }),
            Self::File { path, mut file } => {
                file.flush().map_err(|e| Error::io(&path, e))?;
                Ok(Downloaded {
                    bytes,
                    data: Vec::new(),
                })
            }
        }
    }
}
