//! # zipsift
//!
//! Inspect ZIP archives, local or remote, without reading them whole.
//!
//! Archives are read through a [`ByteSource`]: a window over a local file,
//! an in-memory buffer or an HTTP resource fetched with Range requests.
//! The window can start anywhere, so archives embedded in other files can
//! be examined in place.
//!
//! ## Features
//!
//! - Quick scan through the central directory, two reads for a remote archive
//! - Full scan for every record signature, recovering entries a damaged
//!   or forged central directory hides
//! - ZIP64 records, data descriptors, prepended data
//! - Traditional PKWARE decryption from a password, hex password or the
//!   three internal keys
//! - STORED and DEFLATE entries, CRC-32 checked
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipsift::{ByteSource, HttpRangeReader, KeyMaterial, ScanMode, ZipExtractor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(HttpRangeReader::new("https://example.com/archive.zip".to_string()).await?);
//!     let zip = ZipExtractor::new(ByteSource::new(reader));
//!
//!     let scan = zip.scan(ScanMode::Quick).await?;
//!     for entry in &scan.entries {
//!         println!("{}", entry.summary());
//!     }
//!     for issue in &scan.issues {
//!         eprintln!("warning: {issue}");
//!     }
//!
//!     let key = KeyMaterial::Password(b"secret".to_vec());
//!     for report in zip.extract_all(&scan, &key).await {
//!         match report.result {
//!             Ok(text) => println!("{}: {} bytes", report.entry.display_name(), text.data.len()),
//!             Err(e) => eprintln!("{}: {e}", report.entry.display_name()),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{FetchError, IntegrityWarning, ZipError, ZipResult};
pub use io::{ByteSource, HttpOptions, HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
pub use zip::{
    EntryDescriptor, EntrySelector, KeyMaterial, Plaintext, ScanIssue, ScanMode, ScanResult,
    ZipExtractor,
};
