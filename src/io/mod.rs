//! Random-access byte sources.
//!
//! Backends implement [`ReadAt`] over absolute offsets of the whole
//! resource. [`ByteSource`] narrows a backend to the window under
//! investigation, so an archive embedded at some offset of a larger file
//! can be inspected without the parser ever seeing the surrounding bytes.

mod cache;
mod http;
mod local;
mod memory;

pub use cache::WindowCache;
pub use http::{HttpOptions, HttpRangeReader};
pub use local::LocalFileReader;
pub use memory::MemoryReader;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ZipError, ZipResult};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// May return fewer bytes than requested; zero means end of data.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// A [`ReadAt`] backend restricted to `[start, end)`.
pub struct ByteSource<R: ReadAt> {
    reader: Arc<R>,
    start: u64,
    end: u64,
}

impl<R: ReadAt> Clone for ByteSource<R> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            start: self.start,
            end: self.end,
        }
    }
}

impl<R: ReadAt> ByteSource<R> {
    /// A source covering the whole resource.
    pub fn new(reader: Arc<R>) -> Self {
        let end = reader.size();
        Self {
            reader,
            start: 0,
            end,
        }
    }

    /// A source covering `[offset, offset + length)`.
    ///
    /// `length` is clamped to the end of the resource; `None` means
    /// "up to the end".
    pub fn with_window(reader: Arc<R>, offset: u64, length: Option<u64>) -> ZipResult<Self> {
        let size = reader.size();
        if offset > size {
            return Err(ZipError::OutOfRange {
                offset,
                len: length.unwrap_or(0),
                start: 0,
                end: size,
            });
        }
        let end = match length {
            Some(len) => offset.saturating_add(len).min(size),
            None => size,
        };
        Ok(Self {
            reader,
            start: offset,
            end,
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when `[offset, offset + len)` lies inside the window.
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        offset >= self.start
            && offset
                .checked_add(len)
                .is_some_and(|end| end <= self.end)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Read exactly `len` bytes at `offset`.
    pub async fn read(&self, offset: u64, len: u64) -> ZipResult<Vec<u8>> {
        if !self.contains(offset, len) {
            return Err(self.out_of_range(offset, len));
        }
        self.fill(offset, len).await
    }

    /// Read up to `len` bytes at `offset`, stopping at the window end.
    pub async fn read_upto(&self, offset: u64, len: u64) -> ZipResult<Vec<u8>> {
        if offset < self.start || offset > self.end {
            return Err(self.out_of_range(offset, len));
        }
        let len = len.min(self.end - offset);
        self.fill(offset, len).await
    }

    async fn fill(&self, offset: u64, len: u64) -> ZipResult<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| {
            ZipError::InvalidData(format!("read of {len} bytes exceeds address space"))
        })?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self
                .reader
                .read_at(offset + filled as u64, &mut buf[filled..])
                .await?;
            if n == 0 {
                return Err(ZipError::Truncated {
                    offset,
                    needed: len as u64,
                    available: filled as u64,
                });
            }
            filled += n;
        }
        Ok(buf)
    }

    fn out_of_range(&self, offset: u64, len: u64) -> ZipError {
        ZipError::OutOfRange {
            offset,
            len,
            start: self.start,
            end: self.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(offset: u64, length: Option<u64>) -> ByteSource<MemoryReader> {
        let data: Vec<u8> = (0..=255u8).collect();
        ByteSource::with_window(Arc::new(MemoryReader::new(data)), offset, length).unwrap()
    }

    #[tokio::test]
    async fn reads_inside_window() {
        let src = source(16, Some(32));
        assert_eq!(src.read(16, 4).await.unwrap(), vec![16, 17, 18, 19]);
        assert_eq!(src.read(44, 4).await.unwrap(), vec![44, 45, 46, 47]);
    }

    #[tokio::test]
    async fn refuses_reads_outside_window() {
        let src = source(16, Some(32));
        assert!(matches!(
            src.read(15, 1).await,
            Err(ZipError::OutOfRange { start: 16, end: 48, .. })
        ));
        assert!(matches!(
            src.read(45, 4).await,
            Err(ZipError::OutOfRange { .. })
        ));
        assert!(matches!(
            src.read(u64::MAX, 2).await,
            Err(ZipError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn read_upto_clamps_at_window_end() {
        let src = source(16, Some(32));
        assert_eq!(src.read_upto(40, 100).await.unwrap().len(), 8);
        assert!(src.read_upto(48, 1).await.unwrap().is_empty());
        assert!(src.read_upto(49, 1).await.is_err());
    }

    #[test]
    fn window_is_clamped_to_resource() {
        let src = source(200, Some(1000));
        assert_eq!(src.end(), 256);
        assert_eq!(src.len(), 56);
        let reader = Arc::new(MemoryReader::new(vec![0u8; 8]));
        assert!(ByteSource::with_window(reader, 9, None).is_err());
    }
}
