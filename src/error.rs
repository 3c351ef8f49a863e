//! Error types and the related `ZipResult<T>`.
//!
//! Conditions are split by scope: [`ZipError::NotAZip`] and a [`ZipError::Fetch`]
//! on the very first read end the whole run, everything else is reported
//! for the entry it concerns so the caller can keep going.

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// No end-of-central-directory record or no valid signature was found.
    #[error("Not a ZIP archive: {0}")]
    NotAZip(String),

    /// A read reached outside the configured byte window.
    #[error("Read of {len} bytes at {offset:#x} is outside the window {start:#x}..{end:#x}")]
    OutOfRange {
        offset: u64,
        len: u64,
        start: u64,
        end: u64,
    },

    /// The backing store (file, network) failed.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A structural record or payload extends past the available bytes.
    #[error("Truncated record at {offset:#x}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// The entry is encrypted and no key material was supplied.
    #[error("Entry is encrypted and no password or keys were given")]
    MissingKey,

    /// The decrypted verification byte did not match.
    #[error("Wrong password or keys (check byte {expected:#04x}, got {actual:#04x})")]
    BadKey { expected: u8, actual: u8 },

    /// The entry uses an encryption scheme other than traditional PKWARE encryption.
    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(&'static str),

    #[error("Unsupported compression method: {0}")]
    UnsupportedMethod(u16),

    /// The archive contained data that could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("No entry matching {0}")]
    NoSuchEntry(String),

    /// The caller combined options that cannot be used together.
    #[error("Usage error: {0}")]
    Usage(String),
}

impl ZipError {
    /// True for the conditions that make the rest of a run pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ZipError::NotAZip(_) | ZipError::Fetch(_))
    }
}

impl From<std::io::Error> for ZipError {
    fn from(e: std::io::Error) -> Self {
        ZipError::Fetch(FetchError::Io(e))
    }
}

impl From<reqwest::Error> for ZipError {
    fn from(e: reqwest::Error) -> Self {
        ZipError::Fetch(FetchError::Http(e))
    }
}

/// Failures of the backing store behind a byte source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request failed with status: {0}")]
    Status(reqwest::StatusCode),

    #[error("Remote server does not support Range requests")]
    NoRangeSupport,

    #[error("Remote server did not report the resource length")]
    UnknownLength,

    /// A 206 response whose `Content-Range` does not start where asked.
    #[error("Requested bytes from {requested}, server answered with {content_range:?}")]
    RangeMismatch {
        requested: u64,
        content_range: Option<String>,
    },
}

/// A non-fatal data-integrity problem found after producing plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityWarning {
    #[error("CRC-32 mismatch: expected {expected:08x}, computed {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("Size mismatch: declared {declared} bytes, produced {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Stored data is short: expected {expected} bytes, have {actual}")]
    ShortData { expected: u64, actual: u64 },

    #[error("Inflate stopped after {produced} bytes: {reason}")]
    Inflate { produced: u64, reason: String },
}
