//! Image fetching for catalog-dl
//!
//! Downloads one URL at a time into a flat output directory, streaming the
//! response body to disk in fixed-size chunks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::TryStreamExt;
use log::{debug, info, warn};
use reqwest::{Client, ClientBuilder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::core::error::{Error, Result};
use crate::core::filename::resolve_filename;

/// Default size of each chunk copied from the response body to disk
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Default connect and read inactivity timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for fetching a single image
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Longest wait for the next bytes of a response; a body that keeps
    /// arriving may take longer than this in total
    pub timeout: Duration,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Buffer size for streaming the body to disk
    pub chunk_size: usize,

    /// Extra attempts after a connect or timeout failure
    pub retries: u32,

    /// Delay before the first retry; doubles on each further attempt
    pub retry_base_delay: Duration,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retries: 0,
            retry_base_delay: Duration::from_millis(1000),
            user_agent: format!("catalog-dl/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A file written by a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Delay before retry number `attempt` (1-based), saturating instead of overflowing
fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base_delay.saturating_mul(factor)
}

/// Execute an operation, retrying connect and timeout failures with exponential backoff
async fn retry_on_network_error<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::NetworkError(msg)) if attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay(base_delay, attempt);
                warn!("Network error (attempt {attempt}): {msg}. Retrying in {delay:?}...");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// HTTP fetcher sharing one connection pool across a batch
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    options: FetchOptions,
}

impl Fetcher {
    /// Create a fetcher with its own HTTP client
    pub fn new(options: FetchOptions) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(16)
            .read_timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()?;

        Ok(Self { client, options })
    }

    /// Download a URL into `dir` under its resolved filename
    pub async fn download(&self, url: &str, dir: &Path) -> Result<FetchedFile> {
        let filename = resolve_filename(url);
        self.fetch_to(url, dir, &filename).await
    }

    /// Download a URL into `dir/filename`, overwriting any existing file
    pub async fn fetch_to(&self, url: &str, dir: &Path, filename: &str) -> Result<FetchedFile> {
        if url.is_empty() {
            return Err(Error::InvalidInput("empty URL".to_string()));
        }
        if filename.is_empty() {
            return Err(Error::InvalidInput(format!(
                "filename generation resulted in an empty name for {url}"
            )));
        }

        let path = dir.join(filename);
        debug!("Fetching {url} -> {}", path.display());

        let bytes = retry_on_network_error(
            self.options.retries,
            self.options.retry_base_delay,
            || self.fetch_once(url, &path),
        )
        .await?;

        info!("Downloaded {filename} ({bytes} bytes) from {url}");
        Ok(FetchedFile {
            filename: filename.to_string(),
            path,
            bytes,
        })
    }

    async fn fetch_once(&self, url: &str, path: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        write_stream_to_file(body, path, self.options.chunk_size).await
    }
}

/// Copy a body stream into a freshly truncated file, removing it again on failure
async fn write_stream_to_file<R>(body: R, path: &Path, chunk_size: usize) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let file = tokio::fs::File::create(path).await?;

    match copy_in_chunks(body, file, chunk_size).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(path).await {
                debug!("Could not remove partial file {}: {remove_err}", path.display());
            }
            Err(e)
        }
    }
}

async fn copy_in_chunks<R>(mut body: R, mut file: tokio::fs::File, chunk_size: usize) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut written = 0u64;

    loop {
        let bytes_read = body
            .read(&mut buffer)
            .await
            .map_err(|e| Error::NetworkError(format!("Stream read error: {e}")))?;

        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).await?;
        written += bytes_read as u64;
    }

    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_download_writes_body_under_resolved_name() {
        let mock_server = MockServer::start().await;
        let body = b"RIFF-fake-webp".to_vec();

        Mock::given(method("GET"))
            .and(path("/products/electric-kettle/1.webp"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(fast_options()).unwrap();
        let url = format!("{}/products/electric-kettle/1.webp", mock_server.uri());

        let fetched = fetcher.download(&url, dir.path()).await.unwrap();

        assert_eq!(fetched.filename, "electric-kettle-1.webp");
        assert_eq!(fetched.bytes, body.len() as u64);
        assert_eq!(std::fs::read(dir.path().join("electric-kettle-1.webp")).unwrap(), body);
    }

    #[tokio::test]
    async fn test_large_body_is_streamed_in_chunks() {
        let mock_server = MockServer::start().await;
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        Mock::given(method("GET"))
            .and(path("/big.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            chunk_size: 1024,
            ..fast_options()
        };
        let fetcher = Fetcher::new(options).unwrap();
        let url = format!("{}/big.jpg", mock_server.uri());

        let fetched = fetcher.download(&url, dir.path()).await.unwrap();
        assert_eq!(fetched.bytes, 200_000);
        assert_eq!(std::fs::read(&fetched.path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_server_error_is_reported_and_leaves_no_file() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/broken/photo.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(fast_options()).unwrap();
        let url = format!("{}/broken/photo.jpg", mock_server.uri());

        let err = fetcher.download(&url, dir.path()).await.unwrap_err();
        match err {
            Error::HttpStatus { status, .. } => assert_eq!(status, 500),
            other => panic!("Expected HttpStatus, got {other:?}"),
        }
        assert!(!dir.path().join("photo.jpg").exists());
    }

    #[tokio::test]
    async fn test_http_status_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            retries: 3,
            ..fast_options()
        };
        let fetcher = Fetcher::new(options).unwrap();
        let url = format!("{}/missing.jpg", mock_server.uri());

        let err = fetcher.download(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_existing_file_is_overwritten() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"old content that is longer").unwrap();

        let fetcher = Fetcher::new(fast_options()).unwrap();
        let url = format!("{}/photo.jpg", mock_server.uri());
        fetcher.download(&url, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("photo.jpg")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            timeout: Duration::from_millis(200),
            ..fast_options()
        };
        let fetcher = Fetcher::new(options).unwrap();
        let url = format!("{}/slow.jpg", mock_server.uri());

        let err = fetcher.download(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NetworkError(_)), "got {err:?}");
    }

    /// Serve one 200 response whose body arrives in `chunks` pieces, `gap` apart
    async fn trickle_server(chunks: usize, gap: Duration) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {chunks}\r\nConnection: close\r\n\r\n"
            );
            if socket.write_all(header.as_bytes()).await.is_err() {
                return;
            }
            for _ in 0..chunks {
                tokio::time::sleep(gap).await;
                // The client may have given up already
                if socket.write_all(b"x").await.is_err() || socket.flush().await.is_err() {
                    return;
                }
            }
        });

        format!("http://{addr}/products/kettle/1.webp")
    }

    #[tokio::test]
    async fn test_slow_but_steady_body_outlasts_timeout() {
        let url = trickle_server(6, Duration::from_millis(150)).await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            timeout: Duration::from_millis(500),
            ..fast_options()
        };
        let fetcher = Fetcher::new(options).unwrap();

        // 6 x 150ms is well past the timeout, but no single read waits that long
        let fetched = fetcher.download(&url, dir.path()).await.unwrap();
        assert_eq!(fetched.filename, "kettle-1.webp");
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"xxxxxx");
    }

    #[tokio::test]
    async fn test_stalled_body_times_out_and_leaves_no_file() {
        let url = trickle_server(2, Duration::from_secs(3)).await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            timeout: Duration::from_millis(300),
            ..fast_options()
        };
        let fetcher = Fetcher::new(options).unwrap();

        let err = fetcher.download(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NetworkError(_)), "got {err:?}");
        assert!(!dir.path().join("kettle-1.webp").exists());
    }

    #[test]
    fn test_backoff_delay_doubles_and_saturates() {
        let base = Duration::from_millis(10);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(80));
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(Duration::MAX, 5), Duration::MAX);
    }

    #[tokio::test]
    async fn test_empty_filename_is_rejected() {
        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(fast_options()).unwrap();

        let err = fetcher
            .fetch_to("https://cdn.example.com/a.jpg", dir.path(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_output_dir_is_io_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&mock_server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = Fetcher::new(fast_options()).unwrap();
        let url = format!("{}/photo.jpg", mock_server.uri());

        let err = fetcher
            .download(&url, &dir.path().join("does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IoError(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_retry_exponential_backoff() {
        let call_count = Arc::new(AtomicUsize::new(0));

        let result = retry_on_network_error(3, Duration::from_millis(10), || {
            let count_clone = Arc::clone(&call_count);
            async move {
                let call_num = count_clone.fetch_add(1, Ordering::SeqCst) + 1;
                if call_num <= 2 {
                    Err(Error::NetworkError("Simulated network failure".to_string()))
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_limit() {
        let call_count = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = retry_on_network_error(2, Duration::from_millis(1), || {
            let count_clone = Arc::clone(&call_count);
            async move {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Err(Error::NetworkError("down".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::NetworkError(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retries_by_default() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::default();

        let result: Result<()> = retry_on_network_error(options.retries, Duration::from_millis(1), || {
            let count_clone = Arc::clone(&call_count);
            async move {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Err(Error::NetworkError("down".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
