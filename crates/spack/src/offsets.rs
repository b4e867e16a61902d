//! Offset assignment.
//!
//! The [`OffsetAssigner`] is the only place that can mint a [`BlobRange`] or
//! a [`WriteGrant`]. Writers never compute offsets themselves; they can only
//! spend a grant they were handed. Because the assigner runs as a single
//! sequential task and hands out every grant exactly once, the granted ranges
//! are pairwise disjoint and cover the pack from offset zero without gaps.

use std::collections::{BTreeMap, HashMap};

use spack_digest::ContentHash;
use tokio_util::sync::CancellationToken;

use crate::{
    config::LayoutOrder,
    group::{recv, send},
    types::{CompressedFile, PlacedBlob},
    PackError,
};

/// A half-open byte range `[offset, offset + len)` of the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRange {
    offset: u64,
    len: u64,
}

impl BlobRange {
    /// The first byte of the range.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the range contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// The permission to write one range of the pack. Neither `Clone` nor
/// `Copy`: a grant is spent by writing.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteGrant {
    range: BlobRange,
}

impl WriteGrant {
    /// The range this grant allows writing to.
    pub fn range(&self) -> BlobRange {
        self.range
    }
}

/// Assigns every distinct blob a range at the end of the pack.
#[derive(Debug, Default)]
pub struct OffsetAssigner {
    next_offset: u64,
    placed: HashMap<ContentHash, BlobRange>,
}

impl OffsetAssigner {
    /// Constructs an assigner for an empty pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `file` in the pack.
    ///
    /// The first file with a given hash is appended and receives a
    /// [`WriteGrant`]. Later files with the same hash share that range and
    /// receive no grant.
    pub fn assign(&mut self, file: CompressedFile) -> PlacedBlob {
        if let Some(range) = self.placed.get(&file.hash) {
            return PlacedBlob {
                file,
                range: *range,
                grant: None,
            };
        }

        let range = BlobRange {
            offset: self.next_offset,
            len: file.size,
        };
        self.next_offset += file.size;
        self.placed.insert(file.hash, range);
        PlacedBlob {
            file,
            range,
            grant: Some(WriteGrant { range }),
        }
    }

    /// The size of the pack once every granted range is written.
    pub fn total_size(&self) -> u64 {
        self.next_offset
    }

    /// The number of distinct blobs placed so far.
    pub fn unique_blobs(&self) -> usize {
        self.placed.len()
    }
}

/// Releases items in strictly increasing index order, holding back items
/// that arrive before their predecessors.
#[derive(Debug)]
pub struct Resequencer<T> {
    next_index: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for Resequencer<T> {
    fn default() -> Self {
        Self {
            next_index: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> Resequencer<T> {
    /// Pushes an item. If `index` is the next expected index, it and every
    /// contiguous pending item after it are returned in order.
    pub fn push(&mut self, index: usize, item: T) -> Vec<T> {
        debug_assert!(
            index >= self.next_index && !self.pending.contains_key(&index),
            "index {index} was already released or is pending"
        );
        self.pending.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_index) {
            ready.push(item);
            self.next_index += 1;
        }
        ready
    }

    /// The number of items waiting for a predecessor.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// The sequencing task between the compression pool and the writer pool.
pub(crate) async fn sequencer(
    input: flume::Receiver<CompressedFile>,
    output: flume::Sender<PlacedBlob>,
    layout: LayoutOrder,
    cancel: CancellationToken,
) -> Result<(), PackError> {
    let mut assigner = OffsetAssigner::new();
    let mut resequencer = match layout {
        LayoutOrder::Completion => None,
        LayoutOrder::Discovery => Some(Resequencer::default()),
    };

    while let Some(file) = recv(&input, &cancel).await? {
        let ready = match resequencer.as_mut() {
            Some(resequencer) => resequencer.push(file.index, file),
            None => vec![file],
        };
        for file in ready {
            let placed = assigner.assign(file);
            tracing::trace!(
                "{} placed at {}..{}{}",
                placed.file.source.display(),
                placed.range.offset(),
                placed.range.end(),
                if placed.is_fresh() { "" } else { " (shared)" }
            );
            send(&output, placed, &cancel).await?;
        }
    }

    if let Some(resequencer) = &resequencer {
        debug_assert_eq!(resequencer.pending_len(), 0);
    }
    tracing::debug!(
        "assigned {} bytes to {} distinct blobs",
        assigner.total_size(),
        assigner.unique_blobs()
    );
    Ok(())
}
