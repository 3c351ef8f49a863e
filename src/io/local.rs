use super::ReadAt;
use crate::error::{ZipError, ZipResult};
use async_trait::async_trait;
use log::debug;
use std::fs::File;
use std::path::Path;

/// Positioned reads from a local file.
///
/// The size is taken once at open; bytes appended later are never seen,
/// so a window computed from it stays valid.
pub struct LocalFileReader {
    file: File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> ZipResult<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        if meta.is_dir() {
            return Err(ZipError::Usage(format!("{} is a directory", path.display())));
        }
        debug!("{}: {} bytes", path.display(), meta.len());
        Ok(Self {
            file,
            size: meta.len(),
        })
    }

    #[cfg(unix)]
    fn pread(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn pread(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }

    #[cfg(not(any(unix, windows)))]
    fn pread(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let wanted = (buf.len() as u64).min(self.size - offset) as usize;
        Ok(self.pread(&mut buf[..wanted], offset)?)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
