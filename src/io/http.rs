use async_trait::async_trait;
use log::{debug, trace, warn};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ReadAt, WindowCache};
use crate::error::{FetchError, ZipResult};

/// Tuning for [`HttpRangeReader`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Per-request timeout, surfaced as a fetch error when exceeded
    pub timeout: Duration,
    /// Smallest span fetched on a cache miss
    pub min_fetch: u64,
    /// Number of fetched windows kept around
    pub cache_windows: usize,
    /// Fetched windows above this size are not cached
    pub max_cached_window: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            min_fetch: 64 * 1024,
            cache_windows: 32,
            max_cached_window: 8 * 1024 * 1024,
        }
    }
}

/// HTTP Range reader for remote ZIP files
///
/// Every cache miss costs exactly one `GET` with a `Range` header. Errors
/// are returned as-is; retrying is up to the caller.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    min_fetch: u64,
    cache: Mutex<WindowCache>,
    transferred_bytes: AtomicU64,
    fetch_count: AtomicU64,
}

impl HttpRangeReader {
    /// Create a new HTTP Range reader with default options
    pub async fn new(url: String) -> ZipResult<Self> {
        Self::with_options(url, HttpOptions::default()).await
    }

    /// Create a new HTTP Range reader
    ///
    /// This sends a HEAD request to learn the resource size. When the server
    /// omits `Content-Length`, a one-byte range probe is used instead.
    pub async fn with_options(url: String, options: HttpOptions) -> ZipResult<Self> {
        let client = Client::builder().timeout(options.timeout).build()?;

        let resp = client.head(&url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()).into());
        }

        let accept_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if accept_ranges == "none" {
            return Err(FetchError::NoRangeSupport.into());
        }
        if !accept_ranges.contains("bytes") {
            // Plenty of servers honor ranges without advertising them;
            // the first ranged GET settles it.
            warn!("{url} does not advertise byte ranges");
        }

        let size = match header_u64(resp.headers().get(CONTENT_LENGTH)) {
            Some(size) => size,
            None => probe_size(&client, &url).await?,
        };
        debug!("{url}: {size} bytes");

        Ok(Self {
            client,
            url,
            size,
            min_fetch: options.min_fetch.max(1),
            cache: Mutex::new(WindowCache::new(
                options.cache_windows,
                options.max_cached_window,
            )),
            transferred_bytes: AtomicU64::new(0),
            fetch_count: AtomicU64::new(0),
        })
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Number of range requests issued so far
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, start: u64, end: u64) -> ZipResult<Vec<u8>> {
        let range = format!("bytes={}-{}", start, end);
        trace!("GET {} {}", self.url, range);
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, &range)
            .send()
            .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(FetchError::NoRangeSupport.into()),
            status => return Err(FetchError::Status(status).into()),
        }

        // Bytes from anywhere else would be cached under the wrong offset
        let content_range = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        if content_range.as_deref().and_then(parse_content_range_start) != Some(start) {
            warn!("{}: asked for {range}, got {content_range:?}", self.url);
            return Err(FetchError::RangeMismatch {
                requested: start,
                content_range,
            }
            .into());
        }

        let bytes = resp.bytes().await?;
        self.transferred_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes.to_vec())
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, WindowCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let wanted = (buf.len() as u64).min(self.size - offset) as usize;
        let hit = {
            let mut cache = self.cache();
            cache.copy_into(offset, &mut buf[..wanted])
        };
        if hit {
            trace!("cache hit {:#x}+{}", offset, wanted);
            return Ok(wanted);
        }

        // Fetch generously so neighbouring structural reads hit the cache
        let span = (wanted as u64).max(self.min_fetch);
        let end = (offset + span).min(self.size) - 1;
        let data = Arc::new(self.fetch(offset, end).await?);

        let n = wanted.min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        {
            let mut cache = self.cache();
            cache.insert(offset, data);
        }

        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

fn header_u64(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Learn the resource length from `Content-Range: bytes 0-0/<total>`.
async fn probe_size(client: &Client, url: &str) -> ZipResult<u64> {
    let resp = client.get(url).header(RANGE, "bytes=0-0").send().await?;
    if resp.status() != StatusCode::PARTIAL_CONTENT {
        return Err(FetchError::Status(resp.status()).into());
    }
    resp.headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
        .ok_or_else(|| FetchError::UnknownLength.into())
}

/// First byte of `Content-Range: bytes <start>-<end>/<total>`.
fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.parse().ok()
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}
