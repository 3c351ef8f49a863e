//! On-disk ZIP records.
//!
//! Every parser here works on a byte slice that starts at the record's
//! signature and is told the absolute offset of that slice, so a
//! [`ZipError::Truncated`] always names a position in the resource.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ZipError, ZipResult};

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8; 4] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8; 4] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// General purpose flag: entry is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: sizes and CRC follow the data in a descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: PKWARE strong encryption
pub const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;

const ZIP64_EXTRA_ID: u16 = 0x0001;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    /// WinZip AES marker; the real method sits in the 0x9901 extra field
    Aes,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            99 => CompressionMethod::Aes,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Aes => 99,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::Stored => "store",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Aes => "aes",
            CompressionMethod::Unknown(_) => "unknown",
        }
    }
}

fn check_len(data: &[u8], offset: u64, needed: usize) -> ZipResult<()> {
    if data.len() < needed {
        return Err(ZipError::Truncated {
            offset,
            needed: needed as u64,
            available: data.len() as u64,
        });
    }
    Ok(())
}

fn check_signature(data: &[u8], signature: &[u8; 4], what: &str, offset: u64) -> ZipResult<()> {
    if &data[0..4] != signature {
        return Err(ZipError::InvalidData(format!(
            "expected {what} signature at {offset:#x}"
        )));
    }
    Ok(())
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8; 4] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Parse the record; the comment is taken from whatever follows the
    /// fixed part, up to its declared length.
    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<Self> {
        check_len(data, offset, Self::SIZE)?;
        check_signature(data, Self::SIGNATURE, "end of central directory", offset)?;

        let comment_len = LittleEndian::read_u16(&data[20..22]);
        let comment_end = (Self::SIZE + comment_len as usize).min(data.len());

        Ok(Self {
            disk_number: LittleEndian::read_u16(&data[4..6]),
            disk_with_cd: LittleEndian::read_u16(&data[6..8]),
            disk_entries: LittleEndian::read_u16(&data[8..10]),
            total_entries: LittleEndian::read_u16(&data[10..12]),
            cd_size: LittleEndian::read_u32(&data[12..16]),
            cd_offset: LittleEndian::read_u32(&data[16..20]),
            comment_len,
            comment: data[Self::SIZE..comment_end].to_vec(),
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn total_len(&self) -> u64 {
        Self::SIZE as u64 + self.comment_len as u64
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8; 4] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<Self> {
        check_len(data, offset, Self::SIZE)?;
        check_signature(data, Self::SIGNATURE, "zip64 locator", offset)?;

        Ok(Self {
            disk_with_eocd64: LittleEndian::read_u32(&data[4..8]),
            eocd64_offset: LittleEndian::read_u64(&data[8..16]),
            total_disks: LittleEndian::read_u32(&data[16..20]),
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8; 4] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<Self> {
        check_len(data, offset, Self::MIN_SIZE)?;
        check_signature(data, Self::SIGNATURE, "zip64 end of central directory", offset)?;

        Ok(Self {
            eocd64_size: LittleEndian::read_u64(&data[4..12]),
            version_made_by: LittleEndian::read_u16(&data[12..14]),
            version_needed: LittleEndian::read_u16(&data[14..16]),
            disk_number: LittleEndian::read_u32(&data[16..20]),
            disk_with_cd: LittleEndian::read_u32(&data[20..24]),
            disk_entries: LittleEndian::read_u64(&data[24..32]),
            total_entries: LittleEndian::read_u64(&data[32..40]),
            cd_size: LittleEndian::read_u64(&data[40..48]),
            cd_offset: LittleEndian::read_u64(&data[48..56]),
        })
    }
}

/// Central Directory File Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number_start: u32,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u64,
    pub file_name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    /// Length of the variable part declared by a header starting at `data`.
    pub fn variable_len(data: &[u8]) -> usize {
        LittleEndian::read_u16(&data[28..30]) as usize
            + LittleEndian::read_u16(&data[30..32]) as usize
            + LittleEndian::read_u16(&data[32..34]) as usize
    }

    /// Parse one header; returns it with the number of bytes it occupies.
    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<(Self, usize)> {
        check_len(data, offset, CDFH_MIN_SIZE)?;
        check_signature(data, CDFH_SIGNATURE, "central directory", offset)?;

        let name_len = LittleEndian::read_u16(&data[28..30]) as usize;
        let extra_len = LittleEndian::read_u16(&data[30..32]) as usize;
        let comment_len = LittleEndian::read_u16(&data[32..34]) as usize;
        let total = CDFH_MIN_SIZE + name_len + extra_len + comment_len;
        check_len(data, offset, total)?;

        let name_end = CDFH_MIN_SIZE + name_len;
        let extra_end = name_end + extra_len;

        let mut entry = Self {
            version_made_by: LittleEndian::read_u16(&data[4..6]),
            version_needed: LittleEndian::read_u16(&data[6..8]),
            flags: LittleEndian::read_u16(&data[8..10]),
            compression_method: LittleEndian::read_u16(&data[10..12]),
            last_mod_time: LittleEndian::read_u16(&data[12..14]),
            last_mod_date: LittleEndian::read_u16(&data[14..16]),
            crc32: LittleEndian::read_u32(&data[16..20]),
            compressed_size: LittleEndian::read_u32(&data[20..24]) as u64,
            uncompressed_size: LittleEndian::read_u32(&data[24..28]) as u64,
            disk_number_start: LittleEndian::read_u16(&data[34..36]) as u32,
            internal_attrs: LittleEndian::read_u16(&data[36..38]),
            external_attrs: LittleEndian::read_u32(&data[38..42]),
            lfh_offset: LittleEndian::read_u32(&data[42..46]) as u64,
            file_name: data[CDFH_MIN_SIZE..name_end].to_vec(),
            extra: data[name_end..extra_end].to_vec(),
            comment: data[extra_end..total].to_vec(),
        };
        entry.apply_zip64_extra();

        Ok((entry, total))
    }

    /// Replace saturated 32-bit fields with their zip64 extra field values.
    ///
    /// Values appear in the extra field only for the fields that are
    /// saturated, in the fixed order uncompressed, compressed, offset, disk.
    fn apply_zip64_extra(&mut self) {
        let Some(field) = find_extra_field(&self.extra, ZIP64_EXTRA_ID) else {
            return;
        };
        let mut values = field.chunks_exact(8).map(LittleEndian::read_u64);
        if self.uncompressed_size == 0xFFFFFFFF {
            if let Some(v) = values.next() {
                self.uncompressed_size = v;
            }
        }
        if self.compressed_size == 0xFFFFFFFF {
            if let Some(v) = values.next() {
                self.compressed_size = v;
            }
        }
        if self.lfh_offset == 0xFFFFFFFF {
            if let Some(v) = values.next() {
                self.lfh_offset = v;
            }
        }
    }
}

/// Local File Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Length of the name and extra field declared by a header at `data`.
    pub fn variable_len(data: &[u8]) -> usize {
        LittleEndian::read_u16(&data[26..28]) as usize
            + LittleEndian::read_u16(&data[28..30]) as usize
    }

    /// Parse one header; returns it with its total length (the entry data
    /// starts right after).
    pub fn from_bytes(data: &[u8], offset: u64) -> ZipResult<(Self, usize)> {
        check_len(data, offset, LFH_SIZE)?;
        check_signature(data, LFH_SIGNATURE, "local file header", offset)?;

        let name_len = LittleEndian::read_u16(&data[26..28]) as usize;
        let extra_len = LittleEndian::read_u16(&data[28..30]) as usize;
        let total = LFH_SIZE + name_len + extra_len;
        check_len(data, offset, total)?;

        let name_end = LFH_SIZE + name_len;
        let mut header = Self {
            version_needed: LittleEndian::read_u16(&data[4..6]),
            flags: LittleEndian::read_u16(&data[6..8]),
            compression_method: LittleEndian::read_u16(&data[8..10]),
            last_mod_time: LittleEndian::read_u16(&data[10..12]),
            last_mod_date: LittleEndian::read_u16(&data[12..14]),
            crc32: LittleEndian::read_u32(&data[14..18]),
            compressed_size: LittleEndian::read_u32(&data[18..22]) as u64,
            uncompressed_size: LittleEndian::read_u32(&data[22..26]) as u64,
            file_name: data[LFH_SIZE..name_end].to_vec(),
            extra: data[name_end..total].to_vec(),
        };
        header.apply_zip64_extra();

        Ok((header, total))
    }

    fn apply_zip64_extra(&mut self) {
        let Some(field) = find_extra_field(&self.extra, ZIP64_EXTRA_ID) else {
            return;
        };
        let mut values = field.chunks_exact(8).map(LittleEndian::read_u64);
        if self.uncompressed_size == 0xFFFFFFFF {
            if let Some(v) = values.next() {
                self.uncompressed_size = v;
            }
        }
        if self.compressed_size == 0xFFFFFFFF {
            if let Some(v) = values.next() {
                self.compressed_size = v;
            }
        }
    }

    /// True when the header carries a zip64 extra field, which makes a
    /// trailing data descriptor use 64-bit sizes.
    pub fn is_zip64(&self) -> bool {
        find_extra_field(&self.extra, ZIP64_EXTRA_ID).is_some()
    }
}

/// Data descriptor following the entry data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Whether the optional `PK\x07\x08` signature was present
    pub signed: bool,
    /// Whether sizes are 64-bit
    pub zip64: bool,
}

impl DataDescriptor {
    /// Parse a descriptor whose fields start at `data[0]` (after the
    /// signature, if any).
    pub fn from_fields(data: &[u8], offset: u64, signed: bool, zip64: bool) -> ZipResult<Self> {
        let needed = if zip64 { 20 } else { 12 };
        check_len(data, offset, needed)?;

        let (compressed_size, uncompressed_size) = if zip64 {
            (
                LittleEndian::read_u64(&data[4..12]),
                LittleEndian::read_u64(&data[12..20]),
            )
        } else {
            (
                LittleEndian::read_u32(&data[4..8]) as u64,
                LittleEndian::read_u32(&data[8..12]) as u64,
            )
        };

        Ok(Self {
            crc32: LittleEndian::read_u32(&data[0..4]),
            compressed_size,
            uncompressed_size,
            signed,
            zip64,
        })
    }

    /// Bytes the descriptor occupies in the archive.
    pub fn total_len(&self) -> u64 {
        let fields = if self.zip64 { 20 } else { 12 };
        if self.signed { fields + 4 } else { fields }
    }
}

/// Find the payload of the extra field with the given header id.
pub fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let header_id = LittleEndian::read_u16(&extra[pos..pos + 2]);
        let size = LittleEndian::read_u16(&extra[pos + 2..pos + 4]) as usize;
        let start = pos + 4;
        let end = (start + size).min(extra.len());
        if header_id == id {
            return Some(&extra[start..end]);
        }
        pos = start + size;
    }
    None
}

/// Any structural record, as found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    LocalFileHeader(LocalFileHeader),
    CentralDirectoryEntry(CentralDirectoryEntry),
    EndOfCentralDirectory(EndOfCentralDirectory),
    DataDescriptor(DataDescriptor),
    Zip64EndOfCentralDirectory(Zip64EOCD),
    Zip64Locator(Zip64EOCDLocator),
}

impl Record {
    /// The two signature bytes following `PK`, e.g. `0304`.
    pub fn tag(&self) -> &'static str {
        match self {
            Record::LocalFileHeader(_) => "0304",
            Record::CentralDirectoryEntry(_) => "0102",
            Record::EndOfCentralDirectory(_) => "0506",
            Record::DataDescriptor(_) => "0708",
            Record::Zip64EndOfCentralDirectory(_) => "0606",
            Record::Zip64Locator(_) => "0607",
        }
    }
}

/// A record and the absolute offset of its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedRecord {
    pub offset: u64,
    pub record: Record,
}
