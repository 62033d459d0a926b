//! Archive downloads
//!
//! Downloads run on the host, straight into a cache directory, so a warm
//! cache never touches the network.

use crate::config::schema::FetchConfig;
use crate::error::{SandkitError, SandkitResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Source of archive bytes
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into the file at `dest`, returning the number of bytes written
    async fn fetch(&self, url: &str, dest: &Path) -> SandkitResult<u64>;
}

/// HTTP(S) fetcher backed by ureq
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self::with_limits(config.timeout(), config.max_download_bytes())
    }

    pub fn with_limits(timeout: Duration, max_bytes: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .user_agent(concat!("sandkit/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            max_bytes,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> SandkitResult<u64> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();
        let max_bytes = self.max_bytes;

        tokio::task::spawn_blocking(move || download(&agent, &url, &dest, max_bytes))
            .await
            .map_err(|e| SandkitError::Internal(format!("download task failed: {}", e)))?
    }
}

fn download(agent: &ureq::Agent, url: &str, dest: &Path, max_bytes: u64) -> SandkitResult<u64> {
    info!("Downloading {}", url);

    let mut response = agent
        .get(url)
        .call()
        .map_err(|e| classify(url, e))?;

    let file = File::create(dest)
        .map_err(|e| SandkitError::io(format!("creating {}", dest.display()), e))?;
    let mut writer = BufWriter::new(file);

    let mut reader = response.body_mut().with_config().limit(max_bytes).reader();
    let written = copy_body(&mut reader, &mut writer, url, dest, max_bytes)?;
    writer
        .flush()
        .map_err(|e| SandkitError::io(format!("writing {}", dest.display()), e))?;

    debug!("Downloaded {} bytes from {}", written, url);
    Ok(written)
}

/// Stream the body to disk. Only read errors come from the network; a
/// failing write (disk full, permissions) is a local IO error.
fn copy_body(
    reader: &mut impl Read,
    writer: &mut impl Write,
    url: &str,
    dest: &Path,
    max_bytes: u64,
) -> SandkitResult<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_io(url, max_bytes, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| SandkitError::io(format!("writing {}", dest.display()), e))?;
        written += n as u64;
    }
}

/// Map a request error onto retryable and definitive failures
fn classify(url: &str, err: ureq::Error) -> SandkitError {
    match err {
        ureq::Error::StatusCode(status) if is_transient_status(status) => {
            SandkitError::transient(format!("downloading {}", url), format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => SandkitError::DownloadRejected {
            url: url.to_string(),
            status,
        },
        ureq::Error::BodyExceedsLimit(limit) => SandkitError::DownloadTooLarge {
            url: url.to_string(),
            limit,
        },
        other => SandkitError::transient(format!("downloading {}", url), other.to_string()),
    }
}

fn classify_io(url: &str, max_bytes: u64, err: io::Error) -> SandkitError {
    let too_large = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ureq::Error>())
        .is_some_and(|inner| matches!(inner, ureq::Error::BodyExceedsLimit(_)));

    if too_large {
        SandkitError::DownloadTooLarge {
            url: url.to_string(),
            limit: max_bytes,
        }
    } else {
        SandkitError::transient(format!("downloading {}", url), err.to_string())
    }
}

/// Server-side and throttling statuses worth retrying
pub fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        for status in [500, 502, 503, 504, 408, 429] {
            assert!(is_transient_status(status), "{}", status);
        }
        for status in [400, 401, 403, 404, 410] {
            assert!(!is_transient_status(status), "{}", status);
        }
    }

    #[test]
    fn classify_statuses() {
        let err = classify("https://example.com/a.tar.gz", ureq::Error::StatusCode(503));
        assert!(err.is_retryable());

        let err = classify("https://example.com/a.tar.gz", ureq::Error::StatusCode(404));
        assert!(matches!(err, SandkitError::DownloadRejected { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn classify_limit() {
        let err = classify("https://example.com/a.tar.gz", ureq::Error::BodyExceedsLimit(10));
        assert!(matches!(err, SandkitError::DownloadTooLarge { limit: 10, .. }));
    }

    #[test]
    fn classify_plain_io_is_transient() {
        let err = classify_io(
            "https://example.com/a.tar.gz",
            10,
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        );
        assert!(err.is_retryable());
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("No space left on device"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct DroppedConnection;

    impl Read for DroppedConnection {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    #[test]
    fn local_write_errors_are_not_retried() {
        let mut body: &[u8] = b"archive bytes";
        let err = copy_body(
            &mut body,
            &mut FullDisk,
            "https://example.com/a.tar.gz",
            Path::new("/cache/archive.part"),
            1024,
        )
        .unwrap_err();
        assert!(matches!(err, SandkitError::Io { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn read_errors_are_transient() {
        let mut sink = Vec::new();
        let err = copy_body(
            &mut DroppedConnection,
            &mut sink,
            "https://example.com/a.tar.gz",
            Path::new("/cache/archive.part"),
            1024,
        )
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn copies_whole_body() {
        let mut body: &[u8] = b"archive bytes";
        let mut sink = Vec::new();
        let written = copy_body(&mut body, &mut sink, "u", Path::new("/d"), 1024).unwrap();
        assert_eq!(written, 13);
        assert_eq!(sink, b"archive bytes");
    }
}
