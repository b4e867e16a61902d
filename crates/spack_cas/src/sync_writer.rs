//! Synchronous writer for the blob cache.

use std::{
    fs::File,
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use spack_digest::ContentHash;

use crate::{path_for_hash, CachedBlob, SCRATCH_PREFIX};

/// A synchronous writer for installing a blob in the cache.
///
/// Content is written to a scratch file, and when `finish()` is called, the
/// file is moved to its final location based on the content hash it was
/// created for.
pub struct SyncWriter {
    root: PathBuf,
    hash: ContentHash,
    temp_path: tempfile::TempPath,
    writer: BufWriter<File>,
}

impl SyncWriter {
    /// Opens a new scratch file in the cache and returns a writer that can be
    /// used to write to it.
    ///
    /// Make sure to call `finish` to actually install the blob. Without it,
    /// the scratch file will be deleted.
    ///
    /// # Arguments
    ///
    /// * `root` - The root directory of the cache
    /// * `hash` - The content hash of the source the blob is built from
    pub fn create(root: &Path, hash: ContentHash) -> std::io::Result<Self> {
        fs_err::create_dir_all(root)?;

        // The scratch file lives next to the final location so the rename
        // never crosses a filesystem boundary.
        let temp_file = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(root)?;
        let (file, temp_path) = temp_file.into_parts();
        Ok(SyncWriter {
            root: root.to_path_buf(),
            hash,
            temp_path,
            writer: BufWriter::new(file),
        })
    }

    /// Install the blob in the cache and return where it ended up and how
    /// large it is on disk.
    ///
    /// If another writer installed a blob for the same hash first, the
    /// scratch file is discarded and the existing blob is returned.
    pub fn finish(self) -> std::io::Result<CachedBlob> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;

        // Drop the remaining file handle to ensure there is no more open handle.
        drop(file);

        let path = self.root.join(path_for_hash(&self.hash));
        match self
            .temp_path
            .persist_noclobber(&path)
            .map_err(std::io::Error::from)
        {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::trace!("blob for {} was installed concurrently", self.hash);
            }
            Err(err) => return Err(err),
        }

        let size = fs_err::metadata(&path)?.len();
        Ok(CachedBlob { path, size })
    }
}

impl Write for SyncWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
