//! ZIP structure scanning, decryption and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk record layouts (EOCD, headers, descriptors)
//! - [`parser`]: quick scan, driven by the central directory
//! - [`scanner`]: full scan, driven by record signatures
//! - [`crypto`]: traditional PKWARE encryption
//! - [`decompress`]: store and deflate
//! - [`extractor`]: the API tying these together
//!
//! ## Two ways to read an archive
//!
//! A ZIP file is meant to be read from the end: the End of Central
//! Directory points at the central directory, which points at each local
//! file header. A quick scan does exactly that and costs two reads, which
//! matters over HTTP.
//!
//! Nothing forces the three layers to agree. A full scan ignores the
//! directory and looks at every local header in the window, so entries a
//! forged or damaged directory hides still show up. Comparing both scans
//! is often the fastest way to spot a tampered archive.
//!
//! ## Limitations
//!
//! - Traditional encryption only; AES and strong encryption are detected
//!   and refused
//! - STORED and DEFLATE only
//! - No multi-disk archives

pub mod crypto;
pub mod decompress;
mod entry;
mod extractor;
pub mod parser;
mod scan;
pub mod scanner;
pub mod structures;

pub use crypto::{KeyMaterial, ZipCrypto};
pub use decompress::{Decompressed, decompress};
pub use entry::{CheckByte, EntryDescriptor, EntryOrigin, EntrySummary, SizeSource, display_name};
pub use extractor::{EntryReport, EntrySelector, Plaintext, ZipExtractor};
pub use parser::ZipParser;
pub use scan::{CentralDirectoryIndex, DirectoryLocation, ScanIssue, ScanMode, ScanResult};
pub use scanner::FullScanner;
pub use structures::{CompressionMethod, LocatedRecord, Record};
