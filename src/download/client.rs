//! Fetch worker: one bounded HTTP retrieval into a staging file.
//!
//! [`HttpClient`] streams a response body chunk by chunk, checking the
//! [`AdmissionGate`] before every write. A transfer that fails or crosses the
//! size limit removes its staging file before returning, so callers never see
//! a partial file on the error path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::admission::{Admission, AdmissionGate};
use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, USER_AGENT};
use super::error::DownloadError;

/// A completed transfer sitting in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Staging path holding the complete body.
    pub path: PathBuf,
    /// Body size in bytes.
    pub bytes: u64,
}

/// Network side of the orchestrator.
///
/// This trait uses `async_trait` so the orchestrator can hold an
/// `Arc<dyn Fetcher>`; tests substitute scripted fetchers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Asks the server for the body size without transferring it.
    ///
    /// `Ok(None)` means the server did not say.
    async fn probe_size(&self, url: &str) -> Result<Option<u64>, DownloadError>;

    /// Transfers `url` into `staging_path`, enforcing `gate` on every chunk.
    ///
    /// On any error the staging file no longer exists when this returns.
    async fn fetch_to_staging(
        &self,
        url: &str,
        staging_path: &Path,
        gate: &AdmissionGate,
    ) -> Result<StagedFile, DownloadError>;
}

/// reqwest-backed [`Fetcher`].
///
/// Create once and share; the inner client pools connections.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default 30s connect / 300s read timeouts.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a client with explicit timeouts. Exceeding either surfaces as
    /// [`DownloadError::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the TLS backend cannot be initialized.
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;
        debug!(
            connect_ms = connect_timeout.as_millis(),
            read_ms = read_timeout.as_millis(),
            "created HTTP client"
        );
        Ok(Self { client })
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = validate_url(url)?;
        let response = self
            .client
            .request(method, parsed)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                response.status().as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    #[instrument(skip(self))]
    async fn probe_size(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        let response = self.send(reqwest::Method::HEAD, url).await?;
        let size = declared_content_length(&response);
        debug!(?size, "probed size");
        Ok(size)
    }

    #[instrument(skip(self, gate), fields(staging = %staging_path.display()))]
    async fn fetch_to_staging(
        &self,
        url: &str,
        staging_path: &Path,
        gate: &AdmissionGate,
    ) -> Result<StagedFile, DownloadError> {
        let response = self.send(reqwest::Method::GET, url).await?;

        if let Some(declared) = declared_content_length(&response)
            && !gate.admit(Some(declared)).is_admitted()
        {
            return Err(DownloadError::DeclaredOversize {
                url: url.to_string(),
                declared,
                max_size: gate.max_size(),
            });
        }

        if let Some(parent) = staging_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let file = File::create(staging_path)
            .await
            .map_err(|e| DownloadError::io(staging_path, e))?;

        match stream_to_staging(file, response, url, staging_path, gate).await {
            Ok(bytes) => Ok(StagedFile {
                path: staging_path.to_path_buf(),
                bytes,
            }),
            Err(error) => {
                discard_partial(staging_path).await;
                Err(error)
            }
        }
    }
}

/// Read-chunk, check, write loop. Returns the byte count on success.
async fn stream_to_staging(
    file: File,
    response: reqwest::Response,
    url: &str,
    staging_path: &Path,
    gate: &AdmissionGate,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
        let next_total = bytes_written + chunk.len() as u64;

        if let Admission::Reject(_) = gate.admit_streaming(next_total) {
            warn!(
                url,
                bytes_read = next_total,
                max_size = gate.max_size(),
                "transfer exceeded size limit, aborting"
            );
            return Err(DownloadError::StreamedOversize {
                url: url.to_string(),
                bytes_read: next_total,
                max_size: gate.max_size(),
            });
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(staging_path, e))?;
        bytes_written = next_total;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(staging_path, e))?;
    // Durable before the organizer links it into place.
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(staging_path, e))?;

    Ok(bytes_written)
}

async fn discard_partial(staging_path: &Path) {
    match tokio::fs::remove_file(staging_path).await {
        Ok(()) => debug!(path = %staging_path.display(), "removed partial staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %staging_path.display(),
            error = %e,
            "failed to remove partial staging file"
        ),
    }
}

fn validate_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(parsed)
    } else {
        Err(DownloadError::invalid_url(url))
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

// Read the header rather than Response::content_length(): HEAD bodies are
// empty, so the body size hint reports 0.
fn declared_content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::gzip_stored;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn staging(dir: &TempDir) -> PathBuf {
        dir.path().join(".staging").join("abc.part")
    }

    #[tokio::test]
    async fn test_fetch_to_staging_success() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/MOPA001.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 body"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new().unwrap();
        let url = format!("{}/MOPA001.pdf", mock_server.uri());
        let staged = client
            .fetch_to_staging(&url, &staging(&temp_dir), &AdmissionGate::new(1024))
            .await
            .unwrap();

        assert_eq!(staged.bytes, 13);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn test_fetch_to_staging_404_is_http_status() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new().unwrap();
        let url = format!("{}/missing.pdf", mock_server.uri());
        let result = client
            .fetch_to_staging(&url, &staging(&temp_dir), &AdmissionGate::new(1024))
            .await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
        assert!(!staging(&temp_dir).exists());
    }

    #[tokio::test]
    async fn test_fetch_to_staging_aborts_and_cleans_up_on_streamed_oversize() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        // reqwest drops Content-Length when it decodes gzip, so the size is
        // only discovered while streaming.
        Mock::given(method("GET"))
            .and(path("/unsized.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_bytes(gzip_stored(&vec![b'x'; 60_000])),
            )
            .mount(&mock_server)
            .await;

        let client = HttpClient::new().unwrap();
        let url = format!("{}/unsized.pdf", mock_server.uri());
        let result = client
            .fetch_to_staging(&url, &staging(&temp_dir), &AdmissionGate::new(1000))
            .await;

        assert!(
            matches!(result, Err(DownloadError::StreamedOversize { max_size: 1000, .. })),
            "expected streamed oversize, got {result:?}"
        );
        assert!(!staging(&temp_dir).exists(), "partial file must be removed");
    }

    #[tokio::test]
    async fn test_fetch_to_staging_rejects_large_content_length_before_writing() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/volume.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new().unwrap();
        let url = format!("{}/volume.pdf", mock_server.uri());
        let result = client
            .fetch_to_staging(&url, &staging(&temp_dir), &AdmissionGate::new(100))
            .await;

        assert!(
            matches!(
                result,
                Err(DownloadError::DeclaredOversize {
                    declared: 4096,
                    max_size: 100,
                    ..
                })
            ),
            "got {result:?}"
        );
        assert!(!staging(&temp_dir).exists());
    }

    #[tokio::test]
    async fn test_fetch_to_staging_read_timeout_is_transient_and_cleaned() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/slow.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let client =
            HttpClient::with_timeouts(Duration::from_secs(30), Duration::from_secs(1)).unwrap();
        let url = format!("{}/slow.pdf", mock_server.uri());
        let result = client
            .fetch_to_staging(&url, &staging(&temp_dir), &AdmissionGate::new(1024))
            .await;

        let error = result.unwrap_err();
        assert_eq!(
            crate::download::classify_error(&error),
            crate::download::FailureType::Transient,
            "got {error:?}"
        );
        assert!(!staging(&temp_dir).exists());
    }

    #[tokio::test]
    async fn test_probe_size_reads_content_length() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/proceedings.pdf"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "2202009600"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new().unwrap();
        let url = format!("{}/proceedings.pdf", mock_server.uri());
        assert_eq!(client.probe_size(&url).await.unwrap(), Some(2_202_009_600));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_without_request() {
        let temp_dir = TempDir::new().unwrap();
        let client = HttpClient::new().unwrap();
        let result = client
            .fetch_to_staging(
                "ftp://example.com/a.pdf",
                &staging(&temp_dir),
                &AdmissionGate::new(1),
            )
            .await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }
}
