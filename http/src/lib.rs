mod progress;

use nixvm_fs::{self as fs, FsError};
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};
use url::Url;

pub use crate::progress::DownloadProgress;

const REQUEST_TIMEOUT_SEC: u64 = 30;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),

    #[error("HTTP request error: {0}")]
    Request(#[source] reqwest::Error),

    #[error("HTTP status error: {0}")]
    Status(#[source] reqwest::Error),

    #[error("HTTP stream error: {0}")]
    Stream(#[source] reqwest::Error),

    #[error("File write error for '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .read_timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SEC))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(HttpError::BuildClient)?;
        Ok(HttpClient { client })
    }

    /// Stream `url` into `file_path`, replacing anything already there.
    ///
    /// `on_progress` receives each new whole percentage of the transfer. It
    /// is never called when the server does not announce a content length.
    /// On failure the destination may hold a partial download.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn download_file<P, F>(
        &self,
        url: &Url,
        file_path: P,
        mut on_progress: F,
    ) -> Result<u64, HttpError>
    where
        P: AsRef<Path>,
        F: FnMut(u8),
    {
        let file_path = file_path.as_ref();

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(HttpError::Request)?
            .error_for_status()
            .map_err(HttpError::Status)?;

        let total = resp.content_length();
        debug!(?total, "response received");

        let mut progress = DownloadProgress::new(total);
        if let Some(percent) = progress.advance(0) {
            on_progress(percent);
        }

        let mut file = fs::create_file(file_path).await?;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(HttpError::Stream)?;
            file.write_all(&bytes)
                .await
                .map_err(|source| HttpError::Write {
                    path: file_path.to_path_buf(),
                    source,
                })?;
            if let Some(percent) = progress.advance(bytes.len() as u64) {
                on_progress(percent);
            }
        }

        file.flush().await.map_err(|source| HttpError::Write {
            path: file_path.to_path_buf(),
            source,
        })?;

        Ok(progress.received())
    }
}
