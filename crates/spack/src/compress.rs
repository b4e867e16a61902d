//! The compression stage: looks up or builds the blob for every hashed file.
//!
//! A dispatcher sits in front of the workers and decides, per content hash,
//! which file of the run owns the blob. The owner looks the blob up and
//! builds it on a miss; every later file with the same hash waits for the
//! owner and then finds the blob in the cache. In discovery layout the
//! dispatcher releases files in discovery order, so the owner is always the
//! first discovered file and the blob is the same on every run.

use std::{
    collections::{hash_map::Entry, HashMap},
    path::{Path, PathBuf},
};

use spack_cas::SyncWriter;
use spack_digest::ContentHash;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    blob::{read_blob_name, write_blob},
    config::{CompressionLevel, LayoutOrder},
    group::{recv, send},
    offsets::Resequencer,
    types::{CompressedFile, HashedFile},
    PackError,
};

/// Returns the cached blob for `file`, building and installing it first if
/// the cache does not have one yet.
///
/// Two callers racing on the same hash may both build the blob. Only one
/// copy is installed and both report that copy, including the entry name
/// it was built with.
pub fn compress_file(
    cache_dir: &Path,
    file: HashedFile,
    compression_level: CompressionLevel,
) -> Result<CompressedFile, PackError> {
    let HashedFile { index, path, hash } = file;

    let cached = match spack_cas::lookup(cache_dir, &hash) {
        Ok(Some(blob)) => {
            tracing::debug!("cache hit for {} ({hash})", path.display());
            blob
        }
        Ok(None) => {
            tracing::debug!("compressing {} ({hash})", path.display());
            let writer = SyncWriter::create(cache_dir, hash)
                .and_then(|writer| write_blob(writer, &path, compression_level))
                .map_err(|e| PackError::Compress(path.clone(), e))?;
            writer
                .finish()
                .map_err(|e| PackError::Install(path.clone(), e))?
        }
        Err(e) => return Err(PackError::Install(path, e)),
    };

    let stored_as = fs_err::File::open(&cached.path)
        .and_then(|blob| read_blob_name(std::io::BufReader::new(blob)))
        .map_err(|e| PackError::Install(path.clone(), e))?;

    Ok(CompressedFile {
        index,
        source: path,
        hash,
        blob_path: cached.path,
        stored_as,
        size: cached.size,
    })
}

/// Who is responsible for the blob of a hashed file.
#[derive(Debug)]
pub(crate) enum Claim {
    /// The first file of the run with this hash. Signals once the blob is
    /// in the cache.
    Owner(watch::Sender<bool>),
    /// A later file with the same hash. Waits for the owner.
    Follower(watch::Receiver<bool>),
}

/// A hashed file together with its claim on the blob.
#[derive(Debug)]
pub(crate) struct CompressJob {
    pub file: HashedFile,
    pub claim: Claim,
}

/// Hands out claims and feeds the compression workers.
pub(crate) async fn dispatcher(
    input: flume::Receiver<HashedFile>,
    output: flume::Sender<CompressJob>,
    layout: LayoutOrder,
    cancel: CancellationToken,
) -> Result<(), PackError> {
    let mut resequencer = match layout {
        LayoutOrder::Completion => None,
        LayoutOrder::Discovery => Some(Resequencer::default()),
    };
    let mut claims: HashMap<ContentHash, watch::Receiver<bool>> = HashMap::new();

    while let Some(file) = recv(&input, &cancel).await? {
        let ready = match resequencer.as_mut() {
            Some(resequencer) => resequencer.push(file.index, file),
            None => vec![file],
        };
        for file in ready {
            let claim = match claims.entry(file.hash) {
                Entry::Occupied(entry) => Claim::Follower(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let (built, receiver) = watch::channel(false);
                    entry.insert(receiver);
                    Claim::Owner(built)
                }
            };
            send(&output, CompressJob { file, claim }, &cancel).await?;
        }
    }
    Ok(())
}

/// A single compression worker. Pulls jobs until the queue closes.
pub(crate) async fn worker(
    input: flume::Receiver<CompressJob>,
    output: flume::Sender<CompressedFile>,
    cache_dir: PathBuf,
    compression_level: CompressionLevel,
    cancel: CancellationToken,
) -> Result<(), PackError> {
    while let Some(CompressJob { file, claim }) = recv(&input, &cancel).await? {
        let built = match claim {
            Claim::Owner(built) => Some(built),
            Claim::Follower(mut owner) => {
                // A dropped owner means the run is failing; the token
                // decides what happens next.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PackError::Cancelled),
                    _ = owner.wait_for(|built| *built) => {}
                }
                None
            }
        };

        let cache_dir = cache_dir.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            compress_file(&cache_dir, file, compression_level)
        })
        .await??;
        if let Some(built) = built {
            built.send_replace(true);
        }
        send(&output, compressed, &cancel).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::read_blob;
    use assert_matches::assert_matches;
    use spack_digest::HashAlgorithm;

    fn hashed(index: usize, path: &Path) -> HashedFile {
        HashedFile {
            index,
            path: path.to_path_buf(),
            hash: ContentHash::compute(HashAlgorithm::Md5, std::fs::read(path).unwrap()),
        }
    }

    #[test]
    fn test_builds_and_reuses_blob() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let path = source_dir.path().join("file.txt");
        std::fs::write(&path, b"hello world\n").unwrap();

        let first = compress_file(cache_dir.path(), hashed(0, &path), CompressionLevel::Default)
            .unwrap();
        assert_eq!(
            first.blob_path,
            cache_dir.path().join("spack6f5902ac237024bdd0c176cb93063dc4")
        );
        assert_eq!(first.size, std::fs::metadata(&first.blob_path).unwrap().len());
        let blob = std::fs::read(&first.blob_path).unwrap();

        let second = compress_file(cache_dir.path(), hashed(1, &path), CompressionLevel::Default)
            .unwrap();
        assert_eq!(second.blob_path, first.blob_path);
        assert_eq!(second.size, first.size);
        assert_eq!(second.index, 1);
        assert_eq!(std::fs::read(&second.blob_path).unwrap(), blob);

        let entry = read_blob(blob.as_slice()).unwrap();
        assert_eq!(entry.contents, b"hello world\n");
    }

    #[test]
    fn test_cache_hit_skips_compression() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let path = source_dir.path().join("file.txt");
        std::fs::write(&path, b"cached").unwrap();

        // A blob built from another file with the same content is reused as
        // it is, name included.
        let other = source_dir.path().join("other.txt");
        std::fs::write(&other, b"cached").unwrap();
        let file = hashed(0, &path);
        let blob_path = cache_dir
            .path()
            .join(spack_cas::path_for_hash(&file.hash));
        let blob = write_blob(Vec::new(), &other, CompressionLevel::Best).unwrap();
        std::fs::write(&blob_path, &blob).unwrap();

        let compressed = compress_file(cache_dir.path(), file, CompressionLevel::Default).unwrap();
        assert_eq!(compressed.blob_path, blob_path);
        assert_eq!(compressed.size, blob.len() as u64);
        assert_eq!(compressed.source, path);
        assert_eq!(compressed.stored_as, other);
        assert_eq!(std::fs::read(&blob_path).unwrap(), blob);
    }

    #[test]
    fn test_concurrent_compression_of_same_content() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let path = source_dir.path().join("shared");
        std::fs::write(&path, vec![42u8; 64 * 1024]).unwrap();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let file = hashed(i, &path);
                    let cache_dir = cache_dir.path();
                    scope.spawn(move || {
                        compress_file(cache_dir, file, CompressionLevel::Default).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let installed = std::fs::metadata(&results[0].blob_path).unwrap().len();
        for result in &results {
            assert_eq!(result.blob_path, results[0].blob_path);
            assert_eq!(result.size, installed);
            assert_eq!(result.stored_as, path);
        }
        let entry = read_blob(std::fs::File::open(&results[0].blob_path).unwrap()).unwrap();
        assert_eq!(entry.contents, vec![42u8; 64 * 1024]);

        // Exactly one blob and no scratch files remain.
        assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_first_discovered_file_owns_the_blob() {
        let shared = ContentHash::compute(HashAlgorithm::Md5, b"shared");
        let single = ContentHash::compute(HashAlgorithm::Md5, b"single");

        let (hashed_tx, hashed_rx) = flume::unbounded();
        for (index, hash) in [(2, shared), (1, single), (0, shared)] {
            hashed_tx
                .send(HashedFile {
                    index,
                    path: PathBuf::from(format!("file-{index}")),
                    hash,
                })
                .unwrap();
        }
        drop(hashed_tx);

        let (job_tx, job_rx) = flume::unbounded();
        dispatcher(
            hashed_rx,
            job_tx,
            LayoutOrder::Discovery,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let jobs: Vec<_> = job_rx
            .drain()
            .map(|job| (job.file.index, matches!(job.claim, Claim::Owner(_))))
            .collect();
        assert_eq!(jobs, vec![(0, true), (1, true), (2, false)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_followers_reuse_the_owners_blob() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let first = source_dir.path().join("first");
        let second = source_dir.path().join("second");
        std::fs::write(&first, vec![3u8; 256 * 1024]).unwrap();
        std::fs::write(&second, vec![3u8; 256 * 1024]).unwrap();

        // The follower is queued first so a worker picks it up before the
        // owner has even started.
        let (built, owner) = watch::channel(false);
        let (job_tx, job_rx) = flume::unbounded();
        job_tx
            .send(CompressJob {
                file: hashed(1, &second),
                claim: Claim::Follower(owner),
            })
            .unwrap();
        job_tx
            .send(CompressJob {
                file: hashed(0, &first),
                claim: Claim::Owner(built),
            })
            .unwrap();
        drop(job_tx);

        let (out_tx, out_rx) = flume::unbounded();
        let cancel = CancellationToken::new();
        let workers: Vec<_> = (0..2)
            .map(|_| {
                tokio::spawn(worker(
                    job_rx.clone(),
                    out_tx.clone(),
                    cache_dir.path().to_path_buf(),
                    CompressionLevel::Default,
                    cancel.clone(),
                ))
            })
            .collect();
        drop(out_tx);
        for worker in workers {
            worker.await.unwrap().unwrap();
        }

        let results: Vec<_> = out_rx.drain().collect();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.stored_as, first);
        }
        assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_waiting_follower_observes_cancellation() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let path = source_dir.path().join("file");
        std::fs::write(&path, b"content").unwrap();

        let (_built, owner) = watch::channel(false);
        let (job_tx, job_rx) = flume::unbounded();
        job_tx
            .send(CompressJob {
                file: hashed(1, &path),
                claim: Claim::Follower(owner),
            })
            .unwrap();
        let (out_tx, _out_rx) = flume::unbounded();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker(
            job_rx,
            out_tx,
            cache_dir.path().to_path_buf(),
            CompressionLevel::Default,
            cancel.clone(),
        ));
        cancel.cancel();
        assert_matches!(task.await.unwrap(), Err(PackError::Cancelled));
        assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
    }
}
