//! Full scan: find every structural record by its signature.
//!
//! The central directory is not trusted at all. Every `PK` followed by a
//! known record tag is parsed as a candidate and kept only if its declared
//! layout fits inside the window; signatures that turn up by chance inside
//! compressed data mostly fail that test and are skipped. This recovers
//! entries from archives whose directory is missing, truncated or forged,
//! and finds archives concatenated to or embedded in other files.

use std::borrow::Cow;

use log::{debug, trace, warn};
use memchr::memmem;

use crate::error::{ZipError, ZipResult};
use crate::io::{ByteSource, ReadAt};

use super::entry::{EntryDescriptor, EntryOrigin, SizeSource};
use super::parser::resolve_data_descriptor;
use super::scan::{DirectoryLocation, ScanIssue, ScanMode, ScanResult, entry_divergence};
use super::structures::*;

/// Default number of bytes read per step.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Bytes carried over between chunks so a signature split by a chunk
/// boundary is still seen.
const CARRY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    LocalFileHeader,
    CentralDirectoryEntry,
    EndOfCentralDirectory,
    DataDescriptor,
    Zip64EndOfCentralDirectory,
    Zip64Locator,
}

impl RecordKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"\x03\x04" => Some(RecordKind::LocalFileHeader),
            b"\x01\x02" => Some(RecordKind::CentralDirectoryEntry),
            b"\x05\x06" => Some(RecordKind::EndOfCentralDirectory),
            b"\x07\x08" => Some(RecordKind::DataDescriptor),
            b"\x06\x06" => Some(RecordKind::Zip64EndOfCentralDirectory),
            b"\x06\x07" => Some(RecordKind::Zip64Locator),
            _ => None,
        }
    }
}

/// Signature-scanning parser.
pub struct FullScanner<R: ReadAt> {
    source: ByteSource<R>,
    chunk_size: u64,
}

impl<R: ReadAt> FullScanner<R> {
    pub fn new(source: ByteSource<R>) -> Self {
        Self {
            source,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(64);
        self
    }

    /// Scan the whole window.
    ///
    /// Fails only if the first chunk cannot be read; later read failures
    /// and every malformed record are recorded in the result.
    pub async fn scan(&self) -> ZipResult<ScanResult> {
        let mut result = ScanResult::new(ScanMode::Full);
        let mut pos = self.source.start();
        let mut carry: Vec<u8> = Vec::new();
        let mut first = true;

        while pos < self.source.end() {
            let chunk = match self.source.read_upto(pos, self.chunk_size).await {
                Ok(chunk) => chunk,
                Err(e) if first => return Err(e),
                Err(e) => {
                    warn!("read at {pos:#x} failed: {e}");
                    result.issues.push(ScanIssue::ReadFailed {
                        offset: pos,
                        reason: e.to_string(),
                    });
                    carry.clear();
                    pos = pos.saturating_add(self.chunk_size).min(self.source.end());
                    continue;
                }
            };
            first = false;
            if chunk.is_empty() {
                break;
            }

            let base = pos - carry.len() as u64;
            let mut data = std::mem::take(&mut carry);
            data.extend_from_slice(&chunk);
            pos += chunk.len() as u64;

            let hits: Vec<usize> = memmem::find_iter(&data, b"PK").collect();
            for i in hits {
                if i + 4 > data.len() {
                    break;
                }
                let Some(kind) = RecordKind::from_tag(&data[i + 2..i + 4]) else {
                    continue;
                };
                let at = base + i as u64;
                match self.read_candidate(at, kind, base, &data).await {
                    Ok(Some(record)) => self.accept(at, record, &mut result),
                    Ok(None) => trace!("rejected {kind:?} candidate at {at:#x}"),
                    Err(e @ ZipError::Fetch(_)) => {
                        result.issues.push(ScanIssue::ReadFailed {
                            offset: at,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => trace!("rejected {kind:?} candidate at {at:#x}: {e}"),
                }
            }

            let keep = data.len().min(CARRY);
            carry = data[data.len() - keep..].to_vec();
        }

        debug!(
            "full scan: {} records, {} local headers",
            result.records.len(),
            result.entries.len()
        );

        for entry in result.entries.iter_mut() {
            if entry.needs_data_descriptor() {
                resolve_data_descriptor(&self.source, entry, &mut result.issues).await;
            }
        }
        self.check_sizes(&mut result);
        self.cross_check_directory(&mut result);

        Ok(result)
    }

    fn accept(&self, at: u64, record: Record, result: &mut ScanResult) {
        trace!("PK{} at {at:#x}", record.tag());
        if let Record::LocalFileHeader(header) = &record {
            let header_len =
                (LFH_SIZE + header.file_name.len() + header.extra.len()) as u64;
            result
                .entries
                .push(EntryDescriptor::from_local(header, at, header_len));
        }
        result.records.push(LocatedRecord { offset: at, record });
    }

    /// Bytes `[offset, offset + len)`, from the current chunk when it holds
    /// them.
    async fn bytes_at<'a>(
        &self,
        offset: u64,
        len: u64,
        base: u64,
        data: &'a [u8],
    ) -> ZipResult<Cow<'a, [u8]>> {
        if offset >= base && offset + len <= base + data.len() as u64 {
            let from = (offset - base) as usize;
            return Ok(Cow::Borrowed(&data[from..from + len as usize]));
        }
        Ok(Cow::Owned(self.source.read(offset, len).await?))
    }

    /// Parse a candidate record, or `None` if its layout does not fit the
    /// window.
    async fn read_candidate(
        &self,
        at: u64,
        kind: RecordKind,
        base: u64,
        data: &[u8],
    ) -> ZipResult<Option<Record>> {
        let fixed = fixed_len(kind);
        if !self.source.contains(at, fixed as u64) {
            return Ok(None);
        }
        let head = self.bytes_at(at, fixed as u64, base, data).await?;
        let total = record_len(kind, &head) as u64;
        if !self.source.contains(at, total) {
            return Ok(None);
        }
        let bytes = if total as usize == head.len() {
            head
        } else {
            self.bytes_at(at, total, base, data).await?
        };

        let record = match kind {
            RecordKind::LocalFileHeader => {
                Record::LocalFileHeader(LocalFileHeader::from_bytes(&bytes, at)?.0)
            }
            RecordKind::CentralDirectoryEntry => {
                Record::CentralDirectoryEntry(CentralDirectoryEntry::from_bytes(&bytes, at)?.0)
            }
            RecordKind::EndOfCentralDirectory => {
                Record::EndOfCentralDirectory(EndOfCentralDirectory::from_bytes(&bytes, at)?)
            }
            RecordKind::DataDescriptor => {
                Record::DataDescriptor(DataDescriptor::from_fields(&bytes[4..], at + 4, true, false)?)
            }
            RecordKind::Zip64EndOfCentralDirectory => {
                let eocd64 = Zip64EOCD::from_bytes(&bytes, at)?;
                // The size field excludes the leading 12 bytes
                if eocd64.eocd64_size < (Zip64EOCD::MIN_SIZE - 12) as u64
                    || !self.source.contains(at, eocd64.eocd64_size.saturating_add(12))
                {
                    return Ok(None);
                }
                Record::Zip64EndOfCentralDirectory(eocd64)
            }
            RecordKind::Zip64Locator => {
                Record::Zip64Locator(Zip64EOCDLocator::from_bytes(&bytes, at)?)
            }
        };
        Ok(Some(record))
    }

    /// Flag entries whose declared data does not end where the next record
    /// begins.
    fn check_sizes(&self, result: &mut ScanResult) {
        let offsets: Vec<u64> = result.records.iter().map(|r| r.offset).collect();

        for entry in &result.entries {
            let Some(data_offset) = entry.data_offset else {
                continue;
            };
            if entry.size_source == SizeSource::Unresolved {
                continue;
            }
            let declared_end = data_offset.saturating_add(entry.compressed_size);

            let next = offsets.partition_point(|&o| o < data_offset);
            let next_record = match offsets.get(next) {
                Some(&o) => o,
                None if declared_end > self.source.end() => self.source.end(),
                None => continue,
            };

            let consistent = next_record == declared_end
                || (entry.has_data_descriptor()
                    && [12, 16, 20, 24].iter().any(|d| next_record == declared_end + d));
            if !consistent {
                let name = entry.display_name();
                warn!("{name}: data ends at {declared_end:#x}, next record at {next_record:#x}");
                result.issues.push(ScanIssue::SizeMismatch {
                    name,
                    offset: entry.lfh_offset,
                    declared_end,
                    next_record,
                });
            }
        }
    }

    /// Compare local headers with the directory records found in the same
    /// pass.
    fn cross_check_directory(&self, result: &mut ScanResult) {
        let mut last_eocd = None;
        let mut last_eocd64 = None;
        let mut central_count = 0usize;
        for located in &result.records {
            match &located.record {
                Record::CentralDirectoryEntry(_) => central_count += 1,
                Record::EndOfCentralDirectory(eocd) => last_eocd = Some((located.offset, eocd)),
                Record::Zip64EndOfCentralDirectory(eocd64) => last_eocd64 = Some(eocd64),
                _ => {}
            }
        }

        let location = last_eocd.map(|(eocd_offset, eocd)| match last_eocd64 {
            Some(eocd64) if eocd.is_zip64() => DirectoryLocation {
                eocd_offset,
                declared_offset: eocd64.cd_offset,
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                declared_entries: eocd64.total_entries,
                zip64: true,
            },
            _ => DirectoryLocation {
                eocd_offset,
                declared_offset: eocd.cd_offset as u64,
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                declared_entries: eocd.total_entries as u64,
                zip64: false,
            },
        });

        let difference = if location.is_none() && central_count == 0 {
            None
        } else {
            let local = result
                .entries
                .iter()
                .filter(|e| e.origin == EntryOrigin::LocalHeader)
                .map(|e| (&e.name[..], e.compressed_size, e.uncompressed_size));
            let directory = result.records.iter().filter_map(|r| match &r.record {
                Record::CentralDirectoryEntry(c) => {
                    Some((&c.file_name[..], c.compressed_size, c.uncompressed_size))
                }
                _ => None,
            });
            entry_divergence(local, directory)
        };

        if location.is_none() {
            result.issues.push(ScanIssue::NoCentralDirectory);
        }
        if let Some(difference) = difference {
            warn!("local headers and central directory disagree");
            result.issues.push(ScanIssue::DirectoryMismatch(difference));
        }
        result.directory = location;
    }
}

fn fixed_len(kind: RecordKind) -> usize {
    match kind {
        RecordKind::LocalFileHeader => LFH_SIZE,
        RecordKind::CentralDirectoryEntry => CDFH_MIN_SIZE,
        RecordKind::EndOfCentralDirectory => EndOfCentralDirectory::SIZE,
        RecordKind::DataDescriptor => 16,
        RecordKind::Zip64EndOfCentralDirectory => Zip64EOCD::MIN_SIZE,
        RecordKind::Zip64Locator => Zip64EOCDLocator::SIZE,
    }
}

/// Full length of a record, given at least its fixed part.
fn record_len(kind: RecordKind, head: &[u8]) -> usize {
    match kind {
        RecordKind::LocalFileHeader => LFH_SIZE + LocalFileHeader::variable_len(head),
        RecordKind::CentralDirectoryEntry => {
            CDFH_MIN_SIZE + CentralDirectoryEntry::variable_len(head)
        }
        RecordKind::EndOfCentralDirectory => {
            EndOfCentralDirectory::SIZE + u16::from_le_bytes([head[20], head[21]]) as usize
        }
        _ => fixed_len(kind),
    }
}
