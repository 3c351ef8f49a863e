//! Quick scan: trust the central directory.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) in the window's tail
//! 2. If any EOCD field is saturated, read the ZIP64 EOCD
//! 3. Read the Central Directory in one request and parse its entries
//!
//! Over HTTP this is one request for the tail and, unless the directory
//! already sits inside that tail, one more for the directory.

use log::{debug, warn};
use memchr::memmem;

use crate::error::{ZipError, ZipResult};
use crate::io::{ByteSource, ReadAt};

use super::entry::{EntryDescriptor, SizeSource};
use super::scan::{DirectoryLocation, ScanIssue, ScanMode, ScanResult};
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
const MAX_COMMENT_SIZE: u64 = 65535;

/// Size of the first tail fetch when looking for the EOCD.
const TAIL_PROBE: u64 = 64 * 1024;

/// Chunk size used when searching forward for a data descriptor.
const DESCRIPTOR_SEARCH_CHUNK: u64 = 64 * 1024;

/// An EOCD record and where it was found.
#[derive(Debug, Clone)]
pub struct EocdLocation {
    pub eocd: EndOfCentralDirectory,
    pub offset: u64,
    /// Bytes between the end of the comment and the end of the window
    pub trailing: u64,
}

/// Central-directory based parser.
pub struct ZipParser<R: ReadAt> {
    source: ByteSource<R>,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(source: ByteSource<R>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &ByteSource<R> {
        &self.source
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The last 64 KiB are searched first; only if that fails is the
    /// largest region an EOCD with a maximal comment could occupy fetched.
    ///
    /// # Errors
    ///
    /// [`ZipError::NotAZip`] when no EOCD signature is found.
    pub async fn find_eocd(&self) -> ZipResult<EocdLocation> {
        let len = self.source.len();
        if len < EndOfCentralDirectory::SIZE as u64 {
            return Err(ZipError::NotAZip(format!(
                "{len} bytes is too small for an end of central directory record"
            )));
        }

        let probe = TAIL_PROBE.min(len);
        if let Some(found) = self.search_eocd(probe).await? {
            return Ok(found);
        }

        let max_span =
            (MAX_COMMENT_SIZE + (EndOfCentralDirectory::SIZE + Zip64EOCDLocator::SIZE) as u64)
                .min(len);
        if max_span > probe {
            debug!("EOCD not in the last {probe} bytes, widening to {max_span}");
            if let Some(found) = self.search_eocd(max_span).await? {
                return Ok(found);
            }
        }

        Err(ZipError::NotAZip(
            "no end of central directory signature".to_string(),
        ))
    }

    /// Search the last `span` bytes backwards for an EOCD.
    ///
    /// A record whose comment ends exactly at the window end wins; failing
    /// that, the last record whose comment fits is taken.
    async fn search_eocd(&self, span: u64) -> ZipResult<Option<EocdLocation>> {
        let start = self.source.end() - span;
        let buf = self.source.read(start, span).await?;

        let mut fallback = None;
        for i in memmem::rfind_iter(&buf, EndOfCentralDirectory::SIGNATURE) {
            if i + EndOfCentralDirectory::SIZE > buf.len() {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            let record_end = i + EndOfCentralDirectory::SIZE + comment_len;
            if record_end == buf.len() {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..], start + i as u64)?;
                return Ok(Some(EocdLocation {
                    eocd,
                    offset: start + i as u64,
                    trailing: 0,
                }));
            }
            if record_end < buf.len() && fallback.is_none() {
                fallback = Some((i, buf.len() - record_end));
            }
        }

        match fallback {
            Some((i, trailing)) => {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..], start + i as u64)?;
                Ok(Some(EocdLocation {
                    eocd,
                    offset: start + i as u64,
                    trailing: trailing as u64,
                }))
            }
            None => Ok(None),
        }
    }

    /// Read the ZIP64 locator right before the EOCD and the record it
    /// points to.
    ///
    /// Returns `None` when either record is missing. If the declared
    /// record offset is wrong (prepended data), the position immediately
    /// before the locator is tried as well.
    pub async fn read_zip64_eocd(
        &self,
        eocd_offset: u64,
    ) -> ZipResult<Option<(Zip64EOCDLocator, u64, Zip64EOCD, u64)>> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(None);
        };
        if !self.source.contains(locator_offset, Zip64EOCDLocator::SIZE as u64) {
            return Ok(None);
        }

        let buf = self
            .source
            .read(locator_offset, Zip64EOCDLocator::SIZE as u64)
            .await?;
        if &buf[0..4] != Zip64EOCDLocator::SIGNATURE {
            return Ok(None);
        }
        let locator = Zip64EOCDLocator::from_bytes(&buf, locator_offset)?;

        let mut candidates = vec![locator.eocd64_offset];
        if let Some(adjacent) = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64) {
            if adjacent != locator.eocd64_offset {
                candidates.push(adjacent);
            }
        }

        for offset in candidates {
            if !self.source.contains(offset, Zip64EOCD::MIN_SIZE as u64) {
                continue;
            }
            let buf = self.source.read(offset, Zip64EOCD::MIN_SIZE as u64).await?;
            if &buf[0..4] == Zip64EOCD::SIGNATURE {
                let eocd64 = Zip64EOCD::from_bytes(&buf, offset)?;
                return Ok(Some((locator, locator_offset, eocd64, offset)));
            }
        }

        Ok(None)
    }

    /// Run a quick scan.
    ///
    /// Only a missing EOCD or a failure reading it is an error; problems
    /// with the directory itself are recorded as [`ScanIssue`]s.
    pub async fn scan(&self) -> ZipResult<ScanResult> {
        let mut result = ScanResult::new(ScanMode::Quick);

        let EocdLocation {
            eocd,
            offset: eocd_offset,
            trailing,
        } = self.find_eocd().await?;
        debug!(
            "EOCD at {:#x}: {} entries, directory {:#x}+{}",
            eocd_offset, eocd.total_entries, eocd.cd_offset, eocd.cd_size
        );
        if trailing > 0 {
            result.issues.push(ScanIssue::TrailingData(trailing));
        }

        let mut cd_offset = eocd.cd_offset as u64;
        let mut cd_size = eocd.cd_size as u64;
        let mut total_entries = eocd.total_entries as u64;
        // The directory is expected to end where the next record begins
        let mut directory_end = eocd_offset;
        let mut zip64 = false;

        if eocd.is_zip64() {
            match self.read_zip64_eocd(eocd_offset).await? {
                Some((locator, locator_offset, eocd64, eocd64_offset)) => {
                    cd_offset = eocd64.cd_offset;
                    cd_size = eocd64.cd_size;
                    total_entries = eocd64.total_entries;
                    directory_end = eocd64_offset;
                    zip64 = true;
                    result.records.push(LocatedRecord {
                        offset: eocd64_offset,
                        record: Record::Zip64EndOfCentralDirectory(eocd64),
                    });
                    result.records.push(LocatedRecord {
                        offset: locator_offset,
                        record: Record::Zip64Locator(locator),
                    });
                }
                None => result.issues.push(ScanIssue::MissingZip64Record),
            }
        }
        result.records.push(LocatedRecord {
            offset: eocd_offset,
            record: Record::EndOfCentralDirectory(eocd),
        });

        let shift = self
            .prepended_shift(cd_offset, cd_size, directory_end)
            .await;
        if shift > 0 {
            warn!("archive offsets shifted by {shift} bytes");
            result.issues.push(ScanIssue::PrependedData { shift });
        }

        let location = DirectoryLocation {
            eocd_offset,
            declared_offset: cd_offset,
            offset: cd_offset + shift,
            size: cd_size,
            declared_entries: total_entries,
            zip64,
        };
        self.read_directory(&location, shift, &mut result).await?;
        result.directory = Some(location);
        result.records.sort_by_key(|r| r.offset);

        Ok(result)
    }

    /// Detect an archive whose offsets are relative to a start that is not
    /// the start of the resource (e.g. a self-extractor stub in front).
    async fn prepended_shift(&self, cd_offset: u64, cd_size: u64, directory_end: u64) -> u64 {
        let declared_end = cd_offset.saturating_add(cd_size);
        if declared_end >= directory_end {
            return 0;
        }
        let shift = directory_end - declared_end;
        if self.has_signature(cd_offset, CDFH_SIGNATURE).await
            || !self.has_signature(cd_offset + shift, CDFH_SIGNATURE).await
        {
            return 0;
        }
        shift
    }

    async fn has_signature(&self, offset: u64, signature: &[u8; 4]) -> bool {
        match self.source.read(offset, 4).await {
            Ok(buf) => buf == signature,
            Err(_) => false,
        }
    }

    /// Parse the declared number of directory records, in one read.
    async fn read_directory(
        &self,
        location: &DirectoryLocation,
        shift: u64,
        result: &mut ScanResult,
    ) -> ZipResult<()> {
        let offset = location.offset;
        let total = location.declared_entries;

        if location.size == 0 && total == 0 {
            return Ok(());
        }
        if offset < self.source.start() || offset >= self.source.end() {
            result.issues.push(ScanIssue::DirectoryOutsideWindow {
                offset,
                size: location.size,
            });
            return Ok(());
        }
        if !self.source.contains(offset, location.size) {
            result.issues.push(ScanIssue::DirectoryOutsideWindow {
                offset,
                size: location.size,
            });
        }

        let data = self.source.read_upto(offset, location.size).await?;

        let mut pos = 0usize;
        let mut found = 0u64;
        while found < total && pos < data.len() {
            let record_offset = offset + pos as u64;
            let (cde, len) = match CentralDirectoryEntry::from_bytes(&data[pos..], record_offset) {
                Ok(parsed) => parsed,
                Err(e) => {
                    result.issues.push(ScanIssue::BadDirectoryRecord {
                        offset: record_offset,
                        reason: e.to_string(),
                    });
                    break;
                }
            };
            pos += len;
            found += 1;

            let lfh_offset = cde.lfh_offset + shift;
            let mut entry = EntryDescriptor::from_central(&cde, lfh_offset);
            result.records.push(LocatedRecord {
                offset: record_offset,
                record: Record::CentralDirectoryEntry(cde),
            });

            if !self.source.contains(lfh_offset, LFH_SIZE as u64) {
                result.issues.push(ScanIssue::OffsetOutOfBounds {
                    name: entry.display_name(),
                    offset: lfh_offset,
                });
                continue;
            }
            if entry.needs_data_descriptor() {
                resolve_data_descriptor(&self.source, &mut entry, &mut result.issues).await;
            }
            result.entries.push(entry);
        }

        // Records beyond the declared count
        let mut extra = 0u64;
        while pos + CDFH_MIN_SIZE <= data.len() && &data[pos..pos + 4] == CDFH_SIGNATURE {
            match CentralDirectoryEntry::from_bytes(&data[pos..], offset + pos as u64) {
                Ok((_, len)) => {
                    pos += len;
                    extra += 1;
                }
                Err(_) => break,
            }
        }

        if found + extra != total {
            warn!("directory declares {total} entries, found {}", found + extra);
            result.issues.push(ScanIssue::EntryCountMismatch {
                declared: total,
                found: found + extra,
            });
        }

        Ok(())
    }
}

/// Read and parse the local file header at `offset`.
///
/// Returns the header and its total length; entry data starts at
/// `offset + length`.
pub async fn read_local_header<R: ReadAt>(
    source: &ByteSource<R>,
    offset: u64,
) -> ZipResult<(LocalFileHeader, u64)> {
    let fixed = source.read(offset, LFH_SIZE as u64).await.map_err(|e| match e {
        ZipError::OutOfRange { .. } => ZipError::Truncated {
            offset,
            needed: LFH_SIZE as u64,
            available: source.end().saturating_sub(offset),
        },
        e => e,
    })?;
    if &fixed[0..4] != LFH_SIGNATURE {
        return Err(ZipError::InvalidData(format!(
            "expected local file header at {offset:#x}"
        )));
    }

    let total = (LFH_SIZE + LocalFileHeader::variable_len(&fixed)) as u64;
    if !source.contains(offset, total) {
        return Err(ZipError::Truncated {
            offset,
            needed: total,
            available: source.end().saturating_sub(offset),
        });
    }
    let buf = source.read(offset, total).await?;
    let (header, len) = LocalFileHeader::from_bytes(&buf, offset)?;
    Ok((header, len as u64))
}

/// Fill in sizes and CRC of a flag-bit-3 entry from its data descriptor.
///
/// Never fails: a missing descriptor or a failed read leaves the entry
/// unresolved and is recorded as an issue for that entry alone.
pub async fn resolve_data_descriptor<R: ReadAt>(
    source: &ByteSource<R>,
    entry: &mut EntryDescriptor,
    issues: &mut Vec<ScanIssue>,
) {
    let (data_offset, zip64) = match entry.data_offset {
        Some(data_offset) => {
            let zip64 = match read_local_header(source, entry.lfh_offset).await {
                Ok((header, _)) => header.is_zip64(),
                Err(_) => false,
            };
            (data_offset, zip64)
        }
        None => match read_local_header(source, entry.lfh_offset).await {
            Ok((header, len)) => (entry.lfh_offset + len, header.is_zip64()),
            Err(e) => {
                debug!("{}: {}", entry.display_name(), e);
                let offset = entry.lfh_offset;
                unresolved(entry, offset, e, issues);
                return;
            }
        },
    };

    match locate_data_descriptor(source, data_offset, zip64).await {
        Ok(Some((descriptor, offset))) => {
            debug!(
                "{}: data descriptor at {:#x}, {} compressed bytes",
                entry.display_name(),
                offset,
                descriptor.compressed_size
            );
            entry.data_offset = Some(data_offset);
            entry.apply_descriptor(&descriptor);
        }
        Ok(None) => {
            warn!("{}: no data descriptor found", entry.display_name());
            entry.crc32 = None;
            entry.size_source = SizeSource::Unresolved;
            issues.push(ScanIssue::MissingDataDescriptor {
                name: entry.display_name(),
                offset: entry.lfh_offset,
            });
        }
        Err(e) => {
            warn!("{}: data descriptor search failed: {e}", entry.display_name());
            unresolved(entry, data_offset, e, issues);
        }
    }
}

/// Mark `entry` unresolved after `error`; read failures keep their own
/// issue so they are not mistaken for a missing descriptor.
fn unresolved(
    entry: &mut EntryDescriptor,
    offset: u64,
    error: ZipError,
    issues: &mut Vec<ScanIssue>,
) {
    entry.crc32 = None;
    entry.size_source = SizeSource::Unresolved;
    issues.push(match error {
        ZipError::Fetch(_) => ScanIssue::ReadFailed {
            offset,
            reason: error.to_string(),
        },
        _ => ScanIssue::MissingDataDescriptor {
            name: entry.display_name(),
            offset: entry.lfh_offset,
        },
    });
}

/// Scan forward from `data_offset` for the descriptor ending an entry.
///
/// A candidate is accepted when its compressed size equals the distance
/// from `data_offset` to the descriptor. Signed descriptors are found by
/// their signature; unsigned ones by the record that follows them.
pub async fn locate_data_descriptor<R: ReadAt>(
    source: &ByteSource<R>,
    data_offset: u64,
    zip64: bool,
) -> ZipResult<Option<(DataDescriptor, u64)>> {
    let field_len: u64 = if zip64 { 20 } else { 12 };
    let mut pos = data_offset;
    let mut carry: Vec<u8> = Vec::new();

    while pos < source.end() {
        let chunk = source.read_upto(pos, DESCRIPTOR_SEARCH_CHUNK).await?;
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
            let at = base + i as u64;
            let found = match &data[i + 2..i + 4] {
                b"\x07\x08" => {
                    read_descriptor(source, at + 4, true, zip64).await?
                        .filter(|d| d.compressed_size == at - data_offset)
                }
                b"\x03\x04" | b"\x01\x02" | b"\x05\x06" if at >= data_offset + field_len => {
                    read_descriptor(source, at - field_len, false, zip64).await?
                        .filter(|d| d.compressed_size == at - field_len - data_offset)
                }
                _ => None,
            };
            if let Some(descriptor) = found {
                let offset = if descriptor.signed { at } else { at - field_len };
                return Ok(Some((descriptor, offset)));
            }
        }

        let keep = data.len().min(3);
        carry = data[data.len() - keep..].to_vec();
    }

    Ok(None)
}

async fn read_descriptor<R: ReadAt>(
    source: &ByteSource<R>,
    offset: u64,
    signed: bool,
    zip64: bool,
) -> ZipResult<Option<DataDescriptor>> {
    let len = if zip64 { 20 } else { 12 };
    if !source.contains(offset, len) {
        return Ok(None);
    }
    let buf = source.read(offset, len).await?;
    Ok(Some(DataDescriptor::from_fields(&buf, offset, signed, zip64)?))
}
