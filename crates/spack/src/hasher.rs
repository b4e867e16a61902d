//! The hashing stage.
//!
//! Every file is read into memory in full before it is fingerprinted, so the
//! peak memory use of this stage is roughly the size of the largest file
//! times the number of hash workers.

use std::path::Path;

use spack_digest::{ContentHash, HashAlgorithm};
use tokio_util::sync::CancellationToken;

use crate::{
    group::{recv, send},
    types::{DiscoveredFile, HashedFile},
    PackError,
};

/// Reads the file at `path` and fingerprints its content.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<ContentHash, PackError> {
    let bytes = fs_err::read(path).map_err(|e| PackError::Read(path.to_path_buf(), e))?;
    Ok(ContentHash::compute(algorithm, bytes))
}

/// A single hash worker. Pulls files until the queue closes.
pub(crate) async fn worker(
    input: flume::Receiver<DiscoveredFile>,
    output: flume::Sender<HashedFile>,
    algorithm: HashAlgorithm,
    cancel: CancellationToken,
) -> Result<(), PackError> {
    while let Some(DiscoveredFile { index, path }) = recv(&input, &cancel).await? {
        let (path, hash) = tokio::task::spawn_blocking(move || {
            let hash = hash_file(&path, algorithm)?;
            Ok::<_, PackError>((path, hash))
        })
        .await??;

        tracing::trace!("{} hashed to {hash}", path.display());
        send(&output, HashedFile { index, path, hash }, &cancel).await?;
    }
    Ok(())
}
