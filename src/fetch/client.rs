//! Image Fetcher
//!
//! Download primitive for coin photos plus the decode-level helpers the cache
//! engine needs (dimension probe, thumbnail derivation). Remote sources go
//! through HTTP; `file://` URIs and bare paths are copied from the local
//! filesystem, since collection photos may live on-device.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use image::{ImageFormat, ImageReader};
use reqwest::Client;
use tracing::debug;

/// HTTP request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch-layer error types
///
/// The cache never surfaces these to its callers (a failed fetch degrades to
/// serving the original URI); the taxonomy exists so swallowed failures are
/// logged meaningfully.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("HTTP error ({0})")]
    Status(u16),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Image decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Create a FetchError from an HTTP response status
    pub fn from_status(status: u16, uri: &str) -> Self {
        match status {
            404 => FetchError::NotFound(uri.to_string()),
            408 => FetchError::Timeout,
            _ => FetchError::Status(status),
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Network(_) | FetchError::Status(500..=599)
        )
    }
}

/// Downloads source images into the cache directories
pub struct Fetcher {
    http: Client,
}

impl Fetcher {
    /// Create a fetcher with the default request timeout
    pub fn new() -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { http })
    }

    /// Fetch a source image to `dest`, returning the byte count written.
    ///
    /// `http(s)://` URIs are downloaded; anything else is treated as a local
    /// path (with an optional `file://` prefix) and copied. The write is
    /// atomic: a temp file in the destination directory, persisted on success,
    /// so a crash mid-download never leaves a partial artifact.
    pub async fn download(&self, source_uri: &str, dest: &Path) -> Result<u64, FetchError> {
        if source_uri.starts_with("http://") || source_uri.starts_with("https://") {
            self.download_remote(source_uri, dest).await
        } else {
            copy_local(source_uri, dest)
        }
    }

    async fn download_remote(&self, uri: &str, dest: &Path) -> Result<u64, FetchError> {
        debug!(uri = uri, dest = %dest.display(), "Downloading image");

        let response = self.http.get(uri).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), uri));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        write_atomic(dest, &bytes)?;

        debug!(uri = uri, size = bytes.len(), "Downloaded image");
        Ok(bytes.len() as u64)
    }

    /// Probe image dimensions from the file header without decoding pixels.
    ///
    /// Cached artifacts are always named `.jpg` whatever the source actually
    /// served, so the format is sniffed from content, not the extension.
    pub fn probe_dimensions(path: &Path) -> Result<(u32, u32), FetchError> {
        ImageReader::open(path)
            .map_err(|e| FetchError::Io(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| FetchError::Io(e.to_string()))?
            .into_dimensions()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Derive a thumbnail bounded by `(max_width, max_height)`.
    ///
    /// Decodes the full-size artifact, resizes preserving aspect ratio, and
    /// writes the result as JPEG. CPU-bound; callers run this under
    /// `spawn_blocking`.
    pub fn make_thumbnail(
        src: &Path,
        dest: &Path,
        (max_width, max_height): (u32, u32),
    ) -> Result<(), FetchError> {
        let img = ImageReader::open(src)
            .map_err(|e| FetchError::Io(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| FetchError::Io(e.to_string()))?
            .decode()
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        let thumb = img.thumbnail(max_width, max_height);

        let parent = dest.parent().ok_or_else(|| {
            FetchError::Io(format!("Thumbnail path has no parent: {:?}", dest))
        })?;
        let tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| FetchError::Io(e.to_string()))?;

        // JPEG has no alpha channel
        thumb
            .to_rgb8()
            .save_with_format(tmp.path(), ImageFormat::Jpeg)
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        tmp.persist(dest).map_err(|e| FetchError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Copy a local source (bare path or `file://` URI) into the cache
fn copy_local(source_uri: &str, dest: &Path) -> Result<u64, FetchError> {
    let path = source_uri.strip_prefix("file://").unwrap_or(source_uri);
    let src = Path::new(path);

    if !src.exists() {
        return Err(FetchError::NotFound(source_uri.to_string()));
    }

    let data = fs::read(src).map_err(|e| FetchError::Io(e.to_string()))?;
    write_atomic(dest, &data)?;

    debug!(uri = source_uri, size = data.len(), "Copied local image");
    Ok(data.len() as u64)
}

/// Write bytes to `dest` via a temp file in the same directory
fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), FetchError> {
    let parent = dest
        .parent()
        .ok_or_else(|| FetchError::Io(format!("Destination has no parent: {:?}", dest)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| FetchError::Io(e.to_string()))?;
    tmp.write_all(data).map_err(|e| FetchError::Io(e.to_string()))?;
    tmp.persist(dest).map_err(|e| FetchError::Io(e.to_string()))?;
    Ok(())
}
