//! Wires the stages together and drives a run to completion.

use std::path::PathBuf;

use spack_digest::HashAlgorithm;
use tracing::instrument;

use crate::{
    compress,
    config::PackConfig,
    discovery::{self, Exclusions, FileSource},
    group::{Supervision, TaskGroup},
    hasher,
    manifest::Manifest,
    offsets, writer,
    types::PackedEntry,
    PackError,
};

/// The outcome of a successful run.
#[derive(Debug, Clone)]
pub struct PackReport {
    /// One entry per input file, in discovery order.
    pub entries: Vec<PackedEntry>,

    /// The size of the pack in bytes.
    pub total_size: u64,

    /// The number of distinct blobs written to the pack.
    pub unique_blobs: usize,

    /// The digest used to fingerprint the files.
    pub algorithm: HashAlgorithm,
}

/// Packs the files of a directory into a single file.
///
/// ```no_run
/// # async fn example() -> Result<(), spack::PackError> {
/// let config = spack::PackConfig::new("out.pack", "src").with_workers(4);
/// let report = spack::Packer::new(config)?.run().await?;
/// println!("{} bytes", report.total_size);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Packer {
    config: PackConfig,
}

impl Packer {
    /// Constructs a packer after validating `config`.
    pub fn new(config: PackConfig) -> Result<Self, PackError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this packer was built with.
    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Packs every regular file below the configured root.
    #[instrument(skip_all, fields(root = %self.config.root.display(), destination = %self.config.destination.display()))]
    pub async fn run(&self) -> Result<PackReport, PackError> {
        match fs_err::tokio::metadata(&self.config.root).await {
            Ok(metadata) if metadata.is_dir() => {}
            _ => {
                return Err(PackError::InvalidConfig(format!(
                    "'{}' is not a directory",
                    self.config.root.display()
                )))
            }
        }
        self.execute(FileSource::Walk(self.config.root.clone()))
            .await
    }

    /// Packs exactly the given files, in the given order. The configured
    /// root is ignored.
    #[instrument(skip_all, fields(files = paths.len(), destination = %self.config.destination.display()))]
    pub async fn run_paths(&self, paths: Vec<PathBuf>) -> Result<PackReport, PackError> {
        self.execute(FileSource::List(paths)).await
    }

    async fn execute(&self, source: FileSource) -> Result<PackReport, PackError> {
        let config = &self.config;

        fs_err::tokio::create_dir_all(&config.cache_dir)
            .await
            .map_err(|e| PackError::Install(config.cache_dir.clone(), e))?;
        fs_err::tokio::File::create(&config.destination)
            .await
            .map_err(|e| PackError::Write(config.destination.clone(), e))?;

        // Neither the pack nor a manifest from an earlier run may end up in
        // the pack when they live below the root.
        let mut exclusions = Exclusions::default();
        exclusions.add(&config.destination);
        if let Some(manifest) = &config.manifest {
            exclusions.add(manifest);
        }

        let supervision = Supervision::new();
        let cancel = supervision.token();

        let (discovered_tx, discovered_rx) = flume::bounded(0);
        let (hashed_tx, hashed_rx) = flume::bounded(0);
        let (jobs_tx, jobs_rx) = flume::bounded(0);
        let (compressed_tx, compressed_rx) = flume::bounded(0);
        let (placed_tx, placed_rx) = flume::bounded(0);
        let (done_tx, done_rx) = flume::bounded(0);

        let mut hash_stage = TaskGroup::new(&supervision);
        for _ in 0..config.hash_workers {
            hash_stage.spawn(hasher::worker(
                discovered_rx.clone(),
                hashed_tx.clone(),
                config.algorithm,
                cancel.clone(),
            ));
        }
        drop((discovered_rx, hashed_tx));

        let mut compress_stage = TaskGroup::new(&supervision);
        compress_stage.spawn(compress::dispatcher(
            hashed_rx,
            jobs_tx,
            config.layout,
            cancel.clone(),
        ));
        for _ in 0..config.compress_workers {
            compress_stage.spawn(compress::worker(
                jobs_rx.clone(),
                compressed_tx.clone(),
                config.cache_dir.clone(),
                config.compression_level,
                cancel.clone(),
            ));
        }
        drop((jobs_rx, compressed_tx));

        let mut write_stage = TaskGroup::new(&supervision);
        write_stage.spawn(offsets::sequencer(
            compressed_rx,
            placed_tx,
            config.layout,
            cancel.clone(),
        ));
        for _ in 0..config.write_workers {
            write_stage.spawn(writer::worker(
                placed_rx.clone(),
                done_tx.clone(),
                config.destination.clone(),
                cancel.clone(),
            ));
        }
        drop((placed_rx, done_tx));

        let mut archive = TaskGroup::new(&supervision);
        archive.spawn(hash_stage.wait());
        archive.spawn(compress_stage.wait());
        archive.spawn(write_stage.wait());

        let mut root = TaskGroup::new(&supervision);
        let produce_cancel = cancel.clone();
        root.spawn_blocking(move || {
            discovery::produce(source, &exclusions, discovered_tx, &produce_cancel)
        });
        root.spawn(archive.wait());

        // The completion log ends once the last writer drops its sender.
        let collect = async move {
            let mut entries = Vec::new();
            while let Ok(entry) = done_rx.recv_async().await {
                entries.push(entry);
            }
            entries
        };
        let (result, mut entries) = tokio::join!(root.wait(), collect);

        if let Some(err) = supervision.take_error() {
            return Err(err);
        }
        result?;

        entries.sort_by_key(|entry| entry.index);
        let (total_size, unique_blobs) = entries
            .iter()
            .filter(|entry| !entry.deduplicated)
            .fold((0, 0), |(size, count), entry| (size + entry.size, count + 1));
        let report = PackReport {
            entries,
            total_size,
            unique_blobs,
            algorithm: config.algorithm,
        };

        if let Some(path) = &config.manifest {
            Manifest::from_report(&report)
                .write_to(path)
                .map_err(|e| PackError::Manifest(path.clone(), e))?;
        }

        tracing::info!(
            "packed {} files into {} bytes ({} distinct blobs)",
            report.entries.len(),
            report.total_size,
            report.unique_blobs
        );
        Ok(report)
    }
}
