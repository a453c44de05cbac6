//! Remote fetching for Strata pulls.
//!
//! The [`Fetcher`] downloads single URIs over HTTP(S) or from `file://`
//! paths, either into temp files (object downloads) or into memory
//! (summary, refs, delta superblocks). Concurrency is bounded by a
//! semaphore; every transfer observes the shared cancellation token and
//! counts its bytes.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::StatusCode;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use url::Url;

pub const DEFAULT_CONCURRENT_REQUESTS: usize = 8;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(Url),
    #[error("{uri} exceeds maximum size of {limit} bytes")]
    TooLarge { uri: Url, limit: u64 },
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(Url),
    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

/// Cooperative cancellation shared by every in-flight request of a pull.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    tmp_dir: PathBuf,
    limit: Arc<Semaphore>,
    concurrency: usize,
    bytes_transferred: AtomicU64,
    cancel: CancelToken,
}

impl Fetcher {
    /// Build a fetcher writing temp files into `tmp_dir`.
    pub fn new(tmp_dir: PathBuf, cancel: CancelToken) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            tmp_dir,
            limit: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
            concurrency: DEFAULT_CONCURRENT_REQUESTS,
            bytes_transferred: AtomicU64::new(0),
            cancel,
        })
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        let n = n.max(1);
        self.limit = Arc::new(Semaphore::new(n));
        self.concurrency = n;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Download `url` into a temp file. `expected_max_size = 0` means
    /// unbounded. The caller owns the temp file; dropping it unconsumed
    /// reclaims the space.
    pub async fn fetch_to_temp(
        &self,
        url: &Url,
        expected_max_size: u64,
    ) -> Result<NamedTempFile, FetchError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| FetchError::Cancelled)?;
        tracing::debug!(%url, "fetching to temp file");

        let mut temp = NamedTempFile::new_in(&self.tmp_dir)?;
        match url.scheme() {
            "http" | "https" => {
                let mut response = self.start_request(url).await?;
                let mut total: u64 = 0;
                loop {
                    let chunk = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                        chunk = response.chunk() => chunk?,
                    };
                    let Some(chunk) = chunk else { break };
                    total += chunk.len() as u64;
                    self.check_size(url, total, expected_max_size)?;
                    self.bytes_transferred
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    temp.as_file_mut().write_all(&chunk)?;
                }
            }
            "file" => {
                let bytes = self.read_local(url, expected_max_size).await?;
                temp.as_file_mut().write_all(&bytes)?;
            }
            other => return Err(FetchError::UnsupportedScheme(other.to_string())),
        }
        Ok(temp)
    }

    /// Download `url` into memory. A 404 becomes `Ok(None)` when
    /// `allow_noent` is set.
    pub async fn fetch_membuf(
        &self,
        url: &Url,
        allow_noent: bool,
        max_size: u64,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let result = self.fetch_membuf_inner(url, max_size).await;
        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.is_not_found() && allow_noent => {
                tracing::debug!(%url, "not present on remote");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Download `url` as UTF-8 text.
    pub async fn fetch_utf8(&self, url: &Url) -> Result<String, FetchError> {
        let bytes = self.fetch_membuf_inner(url, 0).await?;
        String::from_utf8(bytes).map_err(|_| FetchError::InvalidUtf8(url.clone()))
    }

    async fn fetch_membuf_inner(&self, url: &Url, max_size: u64) -> Result<Vec<u8>, FetchError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| FetchError::Cancelled)?;
        tracing::debug!(%url, "fetching to memory");

        match url.scheme() {
            "http" | "https" => {
                let mut response = self.start_request(url).await?;
                let mut out = Vec::new();
                loop {
                    let chunk = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                        chunk = response.chunk() => chunk?,
                    };
                    let Some(chunk) = chunk else { break };
                    let total = (out.len() + chunk.len()) as u64;
                    self.check_size(url, total, max_size)?;
                    self.bytes_transferred
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    out.extend_from_slice(&chunk);
                }
                Ok(out)
            }
            "file" => self.read_local(url, max_size).await,
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }

    async fn start_request(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.client.get(url.clone()).send() => response?,
        };
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Err(FetchError::NotFound(url.clone()));
        }
        Ok(response.error_for_status()?)
    }

    async fn read_local(&self, url: &Url, max_size: u64) -> Result<Vec<u8>, FetchError> {
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::UnsupportedScheme(url.scheme().to_string()))?;
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(url.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        self.check_size(url, bytes.len() as u64, max_size)?;
        self.bytes_transferred
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }

    fn check_size(&self, url: &Url, total: u64, max_size: u64) -> Result<(), FetchError> {
        if max_size > 0 && total > max_size {
            return Err(FetchError::TooLarge {
                uri: url.clone(),
                limit: max_size,
            });
        }
        Ok(())
    }
}
