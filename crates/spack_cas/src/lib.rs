#![deny(missing_docs)]

//! Content addressed blob cache for spack.
//!
//! # Architecture
//!
//! The cache is a single flat directory. Every compressed blob is stored in a
//! file named after the [`ContentHash`] of the *source* content it was built
//! from:
//! ```text
//! <cache_root>/
//!   spack6f5902ac237024bdd0c176cb93063dc4
//!   spack<hex>
//!   .spack-XXXXXX      (scratch files of in-flight writers)
//! ```
//!
//! The presence of a file at the hash-derived path is the only signal that a
//! blob exists. There is no separate metadata record.
//!
//! # Installation
//!
//! Writers never touch the final path directly. A [`SyncWriter`] writes into
//! a scratch file inside the cache root (so it shares a filesystem with the
//! final location) and [`SyncWriter::finish`] moves it into place with an
//! atomic, non-clobbering rename. A reader therefore either sees no file or a
//! complete one.
//!
//! Two writers may race on the same hash. Both compute the blob, the first
//! rename wins and the loser discards its scratch file. The installed blob is
//! never replaced afterwards, so a size observed by one worker stays valid for
//! every other worker that copies the blob later.
//!
//! This makes installation first-writer-wins. A later writer for the same
//! hash does not overwrite the cached copy, even when its bytes differ (for
//! example because it was built with another compression level or from a
//! file with another name). Callers that need to know what a blob holds read
//! it back from the cache instead of trusting what they wrote.
//!
//! # Usage
//!
//! ```rust,no_run
//! use spack_cas::SyncWriter;
//! use spack_digest::{ContentHash, HashAlgorithm};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let cache_root = Path::new("/tmp");
//! let hash = ContentHash::compute(HashAlgorithm::Md5, b"hello world\n");
//! if spack_cas::lookup(cache_root, &hash).unwrap().is_none() {
//!     let mut w = SyncWriter::create(cache_root, hash).unwrap();
//!     w.write_all(b"compressed bytes").unwrap();
//!     let blob = w.finish().unwrap();
//!     println!("stored {} bytes at {}", blob.size, blob.path.display());
//! }
//! ```

mod sync_writer;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use spack_digest::ContentHash;
pub use sync_writer::SyncWriter;

/// The prefix of every installed blob.
pub const BLOB_PREFIX: &str = "spack";

/// The prefix of scratch files written by in-flight writers.
const SCRATCH_PREFIX: &str = ".spack-";

/// A blob that is installed in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    /// The absolute location of the blob.
    pub path: PathBuf,

    /// The size of the blob on disk in bytes.
    pub size: u64,
}

/// Returns the relative path in the cache for a given hash. Note that the
/// path might not exist.
///
/// # Arguments
///
/// * `hash` - The content hash of the source file.
pub fn path_for_hash(hash: &ContentHash) -> PathBuf {
    PathBuf::from(format!("{BLOB_PREFIX}{hash:x}"))
}

/// Looks up the blob for `hash`. Returns `None` when nothing is installed
/// under that hash yet.
///
/// The size is read from the filesystem, never from a remembered value.
pub fn lookup(root: &Path, hash: &ContentHash) -> std::io::Result<Option<CachedBlob>> {
    let path = root.join(path_for_hash(hash));
    match fs_err::metadata(&path) {
        Ok(metadata) => Ok(Some(CachedBlob {
            path,
            size: metadata.len(),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spack_digest::HashAlgorithm;
    use std::io::Write;

    fn hash_of(content: &[u8]) -> ContentHash {
        ContentHash::compute(HashAlgorithm::Md5, content)
    }

    #[test]
    fn test_path_for_hash() {
        let hash = hash_of(b"");
        let path = path_for_hash(&hash);
        assert_eq!(path.to_str().unwrap(), "spackd41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_lookup_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(lookup(temp_dir.path(), &hash_of(b"missing")).unwrap(), None);
    }

    #[test]
    fn test_write_and_lookup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache_root = temp_dir.path();
        let hash = hash_of(b"hello world\n");

        let mut writer = SyncWriter::create(cache_root, hash).unwrap();
        writer.write_all(b"Part 1").unwrap();
        writer.write_all(b" Part 2").unwrap();
        let blob = writer.finish().unwrap();

        assert_eq!(blob.path, cache_root.join(path_for_hash(&hash)));
        assert_eq!(blob.size, 13);
        assert_eq!(
            std::fs::read_to_string(&blob.path).unwrap(),
            "Part 1 Part 2"
        );
        assert_eq!(lookup(cache_root, &hash).unwrap(), Some(blob));
    }

    #[test]
    fn test_first_writer_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache_root = temp_dir.path();
        let hash = hash_of(b"raced content");

        // Two writers discover the missing blob at the same time.
        let mut first = SyncWriter::create(cache_root, hash).unwrap();
        let mut second = SyncWriter::create(cache_root, hash).unwrap();
        first.write_all(b"first").unwrap();
        second.write_all(b"second blob").unwrap();

        let installed = first.finish().unwrap();
        let raced = second.finish().unwrap();

        // The loser reports the blob that is actually installed.
        assert_eq!(installed, raced);
        assert_eq!(raced.size, 5);
        assert_eq!(std::fs::read(&raced.path).unwrap(), b"first");
    }

    #[test]
    fn test_no_scratch_files_left_behind() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache_root = temp_dir.path();
        let hash = hash_of(b"abandoned");

        {
            let mut writer = SyncWriter::create(cache_root, hash).unwrap();
            writer.write_all(b"partial").unwrap();
            // Dropped without finishing.
        }
        let mut writer = SyncWriter::create(cache_root, hash).unwrap();
        writer.write_all(b"complete").unwrap();
        writer.finish().unwrap();

        let names: Vec<_> = std::fs::read_dir(cache_root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![path_for_hash(&hash).display().to_string()]);
    }
}
