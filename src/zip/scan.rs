//! Scan results and the inconsistencies a scan can report.

use std::collections::BTreeMap;

use thiserror::Error;

use super::entry::{EntryDescriptor, display_name};
use super::structures::LocatedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Trust the central directory
    Quick,
    /// Search the whole window for record signatures
    Full,
}

/// A structural inconsistency. None of these stop a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanIssue {
    #[error("directory declares {declared} entries, found {found}")]
    EntryCountMismatch { declared: u64, found: u64 },

    #[error("{name}: local header offset {offset:#x} is outside the window")]
    OffsetOutOfBounds { name: String, offset: u64 },

    #[error("central directory {offset:#x}+{size} is outside the window")]
    DirectoryOutsideWindow { offset: u64, size: u64 },

    #[error("archive offsets are shifted by {shift} bytes of prepended data")]
    PrependedData { shift: u64 },

    #[error("{0} bytes follow the end of central directory comment")]
    TrailingData(u64),

    #[error("zip64 sentinels present but no zip64 end of central directory found")]
    MissingZip64Record,

    #[error("bad central directory record at {offset:#x}: {reason}")]
    BadDirectoryRecord { offset: u64, reason: String },

    #[error("{name} at {offset:#x}: data ends at {declared_end:#x}, next record at {next_record:#x}")]
    SizeMismatch {
        name: String,
        offset: u64,
        declared_end: u64,
        next_record: u64,
    },

    #[error("{name} at {offset:#x}: no data descriptor found")]
    MissingDataDescriptor { name: String, offset: u64 },

    #[error("local headers and central directory disagree: {0}")]
    DirectoryMismatch(String),

    #[error("no end of central directory record found")]
    NoCentralDirectory,

    #[error("read at {offset:#x} failed: {reason}")]
    ReadFailed { offset: u64, reason: String },
}

/// Where the central directory sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub eocd_offset: u64,
    /// Offset as declared, before any prepended-data correction
    pub declared_offset: u64,
    /// Offset actually used
    pub offset: u64,
    pub size: u64,
    pub declared_entries: u64,
    pub zip64: bool,
}

/// The central directory as read by a quick scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryIndex {
    pub entries: Vec<EntryDescriptor>,
    pub location: DirectoryLocation,
}

/// Everything one scan found.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub mode: ScanMode,
    pub entries: Vec<EntryDescriptor>,
    /// Structural records in the order they were encountered
    pub records: Vec<LocatedRecord>,
    pub directory: Option<DirectoryLocation>,
    pub issues: Vec<ScanIssue>,
}

impl ScanResult {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
            records: Vec::new(),
            directory: None,
            issues: Vec::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    /// The directory view of a quick scan. Full scans build entries from
    /// local headers and have none.
    pub fn directory_index(&self) -> Option<CentralDirectoryIndex> {
        if self.mode != ScanMode::Quick {
            return None;
        }
        self.directory.as_ref().map(|location| CentralDirectoryIndex {
            entries: self.entries.clone(),
            location: location.clone(),
        })
    }

    /// Compare the multiset of `(name, compressed, uncompressed)` of two
    /// scans; `None` when they agree.
    pub fn divergence(&self, other: &ScanResult) -> Option<String> {
        entry_divergence(
            self.entries.iter().map(|e| (&e.name[..], e.compressed_size, e.uncompressed_size)),
            other.entries.iter().map(|e| (&e.name[..], e.compressed_size, e.uncompressed_size)),
        )
    }
}

/// Multiset difference of two entry listings, rendered for humans.
pub(crate) fn entry_divergence<'a>(
    left: impl Iterator<Item = (&'a [u8], u64, u64)>,
    right: impl Iterator<Item = (&'a [u8], u64, u64)>,
) -> Option<String> {
    let mut counts: BTreeMap<(&[u8], u64, u64), i64> = BTreeMap::new();
    for key in left {
        *counts.entry(key).or_default() += 1;
    }
    for key in right {
        *counts.entry(key).or_default() -= 1;
    }

    let differences: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n != 0)
        .map(|((name, compressed, uncompressed), n)| {
            let side = if n > 0 { "only left" } else { "only right" };
            format!(
                "{} ({}/{}) {} x{}",
                display_name(name),
                compressed,
                uncompressed,
                side,
                n.abs()
            )
        })
        .collect();

    if differences.is_empty() {
        None
    } else {
        Some(differences.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_is_order_independent() {
        let a = [(&b"x"[..], 1, 1), (&b"y"[..], 2, 2)];
        let b = [(&b"y"[..], 2, 2), (&b"x"[..], 1, 1)];
        assert_eq!(entry_divergence(a.into_iter(), b.into_iter()), None);
    }

    #[test]
    fn divergence_counts_duplicates() {
        let a = [(&b"x"[..], 1, 1), (&b"x"[..], 1, 1)];
        let b = [(&b"x"[..], 1, 1)];
        let diff = entry_divergence(a.into_iter(), b.into_iter()).unwrap();
        assert_eq!(diff, "x (1/1) only left x1");
    }

    #[test]
    fn divergence_sees_size_changes() {
        let a = [(&b"x"[..], 1, 1)];
        let b = [(&b"x"[..], 1, 2)];
        assert!(entry_divergence(a.into_iter(), b.into_iter()).is_some());
    }
}
