use log::{debug, warn};

use crate::error::{IntegrityWarning, ZipError, ZipResult};
use crate::io::{ByteSource, ReadAt};

use super::crypto::{KeyMaterial, decrypt_entry};
use super::decompress::decompress;
use super::entry::{EntryDescriptor, SizeSource};
use super::parser::{ZipParser, read_local_header};
use super::scan::{ScanMode, ScanResult};
use super::scanner::{DEFAULT_CHUNK_SIZE, FullScanner};

/// How to pick one entry out of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySelector {
    /// Raw name bytes, or the name as shown in listings
    Name(Vec<u8>),
    /// Position in scan order
    Index(usize),
}

impl EntrySelector {
    pub fn name(name: impl AsRef<[u8]>) -> Self {
        EntrySelector::Name(name.as_ref().to_vec())
    }
}

/// Decrypted and decompressed entry contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plaintext {
    pub data: Vec<u8>,
    pub warning: Option<IntegrityWarning>,
}

/// Outcome of extracting one entry in a batch.
#[derive(Debug)]
pub struct EntryReport {
    pub entry: EntryDescriptor,
    pub result: ZipResult<Plaintext>,
}

/// ZIP archive inspector over a byte window.
pub struct ZipExtractor<R: ReadAt> {
    source: ByteSource<R>,
    chunk_size: u64,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(source: ByteSource<R>) -> Self {
        Self {
            source,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Chunk size for full scans.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn source(&self) -> &ByteSource<R> {
        &self.source
    }

    pub async fn scan(&self, mode: ScanMode) -> ZipResult<ScanResult> {
        let result = match mode {
            ScanMode::Quick => ZipParser::new(self.source.clone()).scan().await?,
            ScanMode::Full => {
                FullScanner::new(self.source.clone())
                    .with_chunk_size(self.chunk_size)
                    .scan()
                    .await?
            }
        };
        for issue in &result.issues {
            debug!("{mode:?} scan issue: {issue}");
        }
        Ok(result)
    }

    /// Look an entry up by name or index; the first match in scan order
    /// wins.
    pub fn entry<'a>(
        &self,
        scan: &'a ScanResult,
        selector: &EntrySelector,
    ) -> ZipResult<&'a EntryDescriptor> {
        let found = match selector {
            EntrySelector::Index(i) => scan.entries.get(*i),
            EntrySelector::Name(name) => scan.entries.iter().find(|e| {
                e.name == *name || e.display_name().as_bytes() == name.as_slice()
            }),
        };
        found.ok_or_else(|| {
            ZipError::NoSuchEntry(match selector {
                EntrySelector::Index(i) => format!("#{i}"),
                EntrySelector::Name(name) => String::from_utf8_lossy(name).into_owned(),
            })
        })
    }

    /// Start of the entry's payload, validating the local header.
    pub async fn data_offset(&self, entry: &EntryDescriptor) -> ZipResult<u64> {
        let (header, len) = read_local_header(&self.source, entry.lfh_offset).await?;
        if header.file_name != entry.name {
            debug!(
                "{}: local header names it {:?}",
                entry.display_name(),
                String::from_utf8_lossy(&header.file_name)
            );
        }
        Ok(entry.lfh_offset + len)
    }

    /// The payload as stored: still encrypted and compressed.
    pub async fn read_stored(&self, entry: &EntryDescriptor) -> ZipResult<Vec<u8>> {
        if entry.size_source == SizeSource::Unresolved {
            return Err(ZipError::InvalidData(format!(
                "{}: compressed size unknown, no data descriptor found",
                entry.display_name()
            )));
        }
        let offset = match entry.data_offset {
            Some(offset) => offset,
            None => self.data_offset(entry).await?,
        };
        if !self.source.contains(offset, entry.compressed_size) {
            return Err(ZipError::Truncated {
                offset,
                needed: entry.compressed_size,
                available: self.source.end().saturating_sub(offset),
            });
        }
        self.source.read(offset, entry.compressed_size).await
    }

    /// Decrypted, not decompressed.
    pub async fn read_raw(&self, entry: &EntryDescriptor, key: &KeyMaterial) -> ZipResult<Vec<u8>> {
        if entry.uses_unsupported_encryption() {
            // Fail before fetching the payload
            return decrypt_entry(entry, Vec::new(), key);
        }
        let payload = self.read_stored(entry).await?;
        decrypt_entry(entry, payload, key)
    }

    /// Decrypted and decompressed, checked against the entry's CRC and
    /// size.
    pub async fn read_plaintext(
        &self,
        entry: &EntryDescriptor,
        key: &KeyMaterial,
    ) -> ZipResult<Plaintext> {
        let raw = self.read_raw(entry, key).await?;
        let out = decompress(entry.compression_method, &raw, entry.uncompressed_size)?;

        let mut warning = out.warning;
        if warning.is_none() && out.data.len() as u64 != entry.uncompressed_size {
            warning = Some(IntegrityWarning::SizeMismatch {
                declared: entry.uncompressed_size,
                actual: out.data.len() as u64,
            });
        }
        if warning.is_none() {
            if let Some(expected) = entry.crc32 {
                let actual = crc32fast::hash(&out.data);
                if actual != expected {
                    warning = Some(IntegrityWarning::CrcMismatch { expected, actual });
                }
            }
        }
        if let Some(w) = &warning {
            warn!("{}: {w}", entry.display_name());
        }

        Ok(Plaintext {
            data: out.data,
            warning,
        })
    }

    /// Extract every entry of a scan, reporting each outcome separately.
    ///
    /// Directory entries are skipped. A failing entry never stops the
    /// batch, not even a fetch error.
    pub async fn extract_all(&self, scan: &ScanResult, key: &KeyMaterial) -> Vec<EntryReport> {
        let mut reports = Vec::with_capacity(scan.entries.len());
        for entry in scan.entries.iter().filter(|e| !e.is_directory()) {
            let result = self.read_plaintext(entry, key).await;
            if let Err(e) = &result {
                warn!("{}: {e}", entry.display_name());
            }
            reports.push(EntryReport {
                entry: entry.clone(),
                result,
            });
        }
        reports
    }

    /// Raw bytes of the window.
    pub async fn read_span(&self, offset: u64, len: u64) -> ZipResult<Vec<u8>> {
        self.source.read(offset, len).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use std::sync::Arc;

    fn fixture(name: &str) -> ZipExtractor<MemoryReader> {
        let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
        let data = std::fs::read(path).unwrap();
        ZipExtractor::new(ByteSource::new(Arc::new(MemoryReader::new(data))))
    }

    #[tokio::test]
    async fn select_by_name_and_index() {
        let zip = fixture("three-stored.zip");
        let scan = zip.scan(ScanMode::Quick).await.unwrap();

        let b = zip.entry(&scan, &EntrySelector::name("b.txt")).unwrap();
        assert_eq!(b.lfh_offset, 40);
        let c = zip.entry(&scan, &EntrySelector::Index(2)).unwrap();
        assert_eq!(c.name, b"c.txt");

        assert!(matches!(
            zip.entry(&scan, &EntrySelector::name("d.txt")),
            Err(ZipError::NoSuchEntry(_))
        ));
        assert!(matches!(
            zip.entry(&scan, &EntrySelector::Index(3)),
            Err(ZipError::NoSuchEntry(_))
        ));
    }

    #[tokio::test]
    async fn stored_payload_and_offsets() {
        let zip = fixture("three-stored.zip");
        let scan = zip.scan(ScanMode::Quick).await.unwrap();
        let a = zip.entry(&scan, &EntrySelector::Index(0)).unwrap();

        assert_eq!(zip.data_offset(a).await.unwrap(), 35);
        assert_eq!(zip.read_stored(a).await.unwrap(), b"hello");
        let text = zip.read_plaintext(a, &KeyMaterial::None).await.unwrap();
        assert_eq!(text.data, b"hello");
        assert_eq!(text.warning, None);
    }

    #[tokio::test]
    async fn read_span_is_bounded() {
        let zip = fixture("three-stored.zip");
        assert_eq!(zip.read_span(0, 4).await.unwrap(), b"PK\x03\x04");
        assert!(matches!(
            zip.read_span(1280, 10).await,
            Err(ZipError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn crc_mismatch_is_a_warning() {
        let zip = fixture("three-stored.zip");
        let scan = zip.scan(ScanMode::Quick).await.unwrap();
        let mut a = zip.entry(&scan, &EntrySelector::Index(0)).unwrap().clone();
        a.crc32 = Some(0xdeadbeef);

        let text = zip.read_plaintext(&a, &KeyMaterial::None).await.unwrap();
        assert_eq!(text.data, b"hello");
        assert_eq!(
            text.warning,
            Some(IntegrityWarning::CrcMismatch {
                expected: 0xdeadbeef,
                actual: 0x3610a686
            })
        );
    }

    #[tokio::test]
    async fn unresolved_sizes_are_refused() {
        let zip = fixture("three-stored.zip");
        let scan = zip.scan(ScanMode::Quick).await.unwrap();
        let mut a = zip.entry(&scan, &EntrySelector::Index(0)).unwrap().clone();
        a.size_source = SizeSource::Unresolved;
        assert!(matches!(
            zip.read_stored(&a).await,
            Err(ZipError::InvalidData(_))
        ));
    }
}
