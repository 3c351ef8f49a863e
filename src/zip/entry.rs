//! Entry descriptors produced by the scanners.

use std::fmt;

use super::structures::{
    CentralDirectoryEntry, CompressionMethod, DataDescriptor, FLAG_DATA_DESCRIPTOR,
    FLAG_ENCRYPTED, FLAG_STRONG_ENCRYPTION, LocalFileHeader,
};

/// Which record an entry was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    CentralDirectory,
    LocalHeader,
}

/// Where the entry's sizes and CRC came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    Header,
    DataDescriptor,
    /// Flag bit 3 was set, the header had no sizes and no descriptor was found
    Unresolved,
}

/// The byte the last byte of a decrypted encryption header must equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckByte {
    /// High byte of the entry's CRC-32
    Crc(u8),
    /// High byte of the DOS modification time, used when the CRC was not
    /// known when the header was written (flag bit 3)
    ModTime(u8),
}

impl CheckByte {
    pub fn value(&self) -> u8 {
        match self {
            CheckByte::Crc(b) | CheckByte::ModTime(b) => *b,
        }
    }
}

/// One located archive entry.
///
/// Unique within a scan by `(name, lfh_offset)`; malformed and polyglot
/// archives can repeat names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub name: Vec<u8>,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub flags: u16,
    pub lfh_offset: u64,
    /// Start of the entry data, when already known from the local header
    pub data_offset: Option<u64>,
    pub crc32: Option<u32>,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub origin: EntryOrigin,
    pub size_source: SizeSource,
}

impl EntryDescriptor {
    pub fn from_central(entry: &CentralDirectoryEntry, lfh_offset: u64) -> Self {
        Self {
            name: entry.file_name.clone(),
            compression_method: CompressionMethod::from_u16(entry.compression_method),
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            flags: entry.flags,
            lfh_offset,
            data_offset: None,
            crc32: Some(entry.crc32),
            last_mod_time: entry.last_mod_time,
            last_mod_date: entry.last_mod_date,
            origin: EntryOrigin::CentralDirectory,
            size_source: SizeSource::Header,
        }
    }

    pub fn from_local(header: &LocalFileHeader, lfh_offset: u64, header_len: u64) -> Self {
        let mut entry = Self {
            name: header.file_name.clone(),
            compression_method: CompressionMethod::from_u16(header.compression_method),
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            flags: header.flags,
            lfh_offset,
            data_offset: Some(lfh_offset + header_len),
            crc32: Some(header.crc32),
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            origin: EntryOrigin::LocalHeader,
            size_source: SizeSource::Header,
        };
        if entry.needs_data_descriptor() {
            entry.crc32 = None;
            entry.size_source = SizeSource::Unresolved;
        }
        entry
    }

    /// Take sizes and CRC from a trailing data descriptor.
    pub fn apply_descriptor(&mut self, descriptor: &DataDescriptor) {
        self.compressed_size = descriptor.compressed_size;
        self.uncompressed_size = descriptor.uncompressed_size;
        self.crc32 = Some(descriptor.crc32);
        self.size_source = SizeSource::DataDescriptor;
    }

    /// Flag bit 3 is set and the header left the sizes blank.
    pub fn needs_data_descriptor(&self) -> bool {
        self.has_data_descriptor() && self.compressed_size == 0 && self.uncompressed_size == 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0 || self.compression_method == CompressionMethod::Aes
    }

    /// AES or PKWARE strong encryption rather than the traditional cipher.
    pub fn uses_unsupported_encryption(&self) -> bool {
        self.compression_method == CompressionMethod::Aes
            || self.flags & FLAG_STRONG_ENCRYPTION != 0
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with(b"/")
    }

    /// Source of the encryption header's verification byte.
    pub fn check_byte(&self) -> CheckByte {
        if self.has_data_descriptor() {
            CheckByte::ModTime((self.last_mod_time >> 8) as u8)
        } else {
            CheckByte::Crc((self.crc32.unwrap_or(0) >> 24) as u8)
        }
    }

    /// The name as text: UTF-8 when printable, `hex-...` otherwise.
    pub fn display_name(&self) -> String {
        display_name(&self.name)
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            name: self.display_name(),
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            method: self.compression_method,
            encrypted: self.is_encrypted(),
            crc32: self.crc32,
            modified: (self.mod_date(), self.mod_time()),
        }
    }
}

/// Display record for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub method: CompressionMethod,
    pub encrypted: bool,
    pub crc32: Option<u32>,
    pub modified: ((u16, u8, u8), (u8, u8, u8)),
}

impl fmt::Display for EntrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ratio = if self.uncompressed_size > 0 {
            100.0 * self.compressed_size as f64 / self.uncompressed_size as f64
        } else {
            0.0
        };
        let ((year, month, day), (hour, minute, second)) = self.modified;
        let crc = self.crc32.map_or_else(|| "????????".to_string(), |c| format!("{c:08x}"));
        write!(
            f,
            "{:>10} ({:5.1}%)  {:04}-{:02}-{:02} {:02}:{:02}:{:02}  {}  {:<7} [{:5}] {}",
            self.uncompressed_size,
            ratio,
            year,
            month,
            day,
            hour,
            minute,
            second,
            crc,
            self.method.name(),
            if self.encrypted { "CRYPT" } else { "" },
            self.name
        )
    }
}

/// Render raw name bytes: UTF-8 when printable, `hex-...` otherwise.
pub fn display_name(name: &[u8]) -> String {
    match std::str::from_utf8(name) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => format!("hex-{}", hex::encode(name)),
    }
}
