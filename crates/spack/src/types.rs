//! The values handed from one pipeline stage to the next.
//!
//! Each stage consumes the type produced by the previous one and adds the
//! field it is responsible for, so a value can never reach a stage before
//! the information that stage needs exists.

use std::path::PathBuf;

use spack_digest::ContentHash;

use crate::offsets::{BlobRange, WriteGrant};

/// A regular file found below the scanned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// The position of the file in discovery order.
    pub index: usize,
    /// The location of the file.
    pub path: PathBuf,
}

/// A file whose content has been fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    /// The position of the file in discovery order.
    pub index: usize,
    /// The location of the file.
    pub path: PathBuf,
    /// The fingerprint of the file's content.
    pub hash: ContentHash,
}

/// A file for which a compressed blob exists in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedFile {
    /// The position of the file in discovery order.
    pub index: usize,
    /// The location of the source file.
    pub source: PathBuf,
    /// The fingerprint of the file's content.
    pub hash: ContentHash,
    /// The location of the blob in the cache.
    pub blob_path: PathBuf,
    /// The entry name recorded in the blob. Differs from `source` when the
    /// blob was built from another file with the same content.
    pub stored_as: PathBuf,
    /// The size of the blob on disk.
    pub size: u64,
}

/// A compressed file that has been given a place in the pack.
///
/// Only the first file of every distinct content hash carries a
/// [`WriteGrant`]; files with already placed content share its range.
#[derive(Debug)]
pub struct PlacedBlob {
    /// The blob being placed.
    pub file: CompressedFile,
    /// Where the blob lives in the pack.
    pub range: BlobRange,
    pub(crate) grant: Option<WriteGrant>,
}

impl PlacedBlob {
    /// Returns true if this item is responsible for writing its range.
    pub fn is_fresh(&self) -> bool {
        self.grant.is_some()
    }

    /// Takes the permission to write the range out of this item.
    pub fn take_grant(&mut self) -> Option<WriteGrant> {
        self.grant.take()
    }

    /// Converts this item into a completion log entry.
    pub(crate) fn into_entry(self, deduplicated: bool) -> PackedEntry {
        PackedEntry {
            index: self.file.index,
            source: self.file.source,
            hash: self.file.hash,
            stored_as: self.file.stored_as,
            offset: self.range.offset(),
            size: self.range.len(),
            deduplicated,
        }
    }
}

/// A file that is fully represented in the pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedEntry {
    /// The position of the file in discovery order.
    pub index: usize,
    /// The location of the source file.
    pub source: PathBuf,
    /// The fingerprint of the file's content.
    pub hash: ContentHash,
    /// The entry name a reader finds when decoding the blob. Files that
    /// share content share one blob and therefore one name.
    pub stored_as: PathBuf,
    /// The offset of the file's blob in the pack.
    pub offset: u64,
    /// The size of the file's blob in the pack.
    pub size: u64,
    /// True if the blob was written for an earlier file with the same
    /// content and this entry merely refers to it.
    pub deduplicated: bool,
}
