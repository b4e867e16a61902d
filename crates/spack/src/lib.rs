#![deny(missing_docs)]

//! Packs a tree of files into a single file.
//!
//! Every regular file below a root directory is fingerprinted, turned into a
//! self-contained gzip compressed tar blob and copied into the pack. Blobs
//! are cached on disk keyed by their content hash, so identical content is
//! compressed once and stored in the pack once no matter how many files
//! carry it.
//!
//! The work runs as a pipeline of concurrent stages connected by rendezvous
//! channels:
//!
//! 1. discovery walks the root,
//! 2. a pool of hash workers fingerprints file contents,
//! 3. a dispatcher picks one file per distinct content to own its blob and
//!    a pool of compression workers looks up or builds the cached blobs,
//! 4. a single sequencer assigns every distinct blob its range of the pack,
//! 5. a pool of writers copies blobs into their ranges in parallel.
//!
//! The first error raised by any stage cancels the whole run and is what
//! [`Packer::run`] returns.

mod config;
mod error;
mod group;
mod manifest;
mod pipeline;
mod types;

pub mod blob;
pub mod compress;
pub mod discovery;
pub mod hasher;
pub mod offsets;
pub mod writer;

pub use blob::{read_blob, read_blob_at, BlobEntry};
pub use config::{CompressionLevel, LayoutOrder, PackConfig, DEFAULT_WORKERS};
pub use discovery::FileSource;
pub use error::PackError;
pub use manifest::{Manifest, ManifestEntry};
pub use offsets::{BlobRange, WriteGrant};
pub use pipeline::{PackReport, Packer};
pub use spack_digest::{ContentHash, HashAlgorithm};
pub use types::{CompressedFile, DiscoveredFile, HashedFile, PackedEntry, PlacedBlob};

/// Packs every regular file below `config.root` into `config.destination`.
pub async fn pack(config: PackConfig) -> Result<PackReport, PackError> {
    Packer::new(config)?.run().await
}
