//! Configuration of a pack run.

use std::path::PathBuf;

use spack_digest::HashAlgorithm;

use crate::PackError;

/// The number of workers in each pool unless configured otherwise.
pub const DEFAULT_WORKERS: usize = 8;

/// Select the gzip compression level used for blobs.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Use the fastest compression level (1)
    Fastest,
    /// Use the highest compression level (9)
    Best,
    /// Use the default compression level (6)
    #[default]
    Default,
    /// Use a numeric compression level (0-9)
    Numeric(u32),
}

impl CompressionLevel {
    pub(crate) fn to_gzip_level(self) -> Result<flate2::Compression, std::io::Error> {
        match self {
            CompressionLevel::Fastest => Ok(flate2::Compression::fast()),
            CompressionLevel::Best => Ok(flate2::Compression::best()),
            CompressionLevel::Default => Ok(flate2::Compression::default()),
            CompressionLevel::Numeric(n) => {
                if n > 9 {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "gzip compression level must be between 0 and 9",
                    ))
                } else {
                    Ok(flate2::Compression::new(n))
                }
            }
        }
    }
}

/// Determines the order in which blobs are laid out in the pack.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOrder {
    /// Blobs are placed in the order the compression workers finish them.
    /// This is the fastest option but the layout differs between runs.
    #[default]
    Completion,

    /// Blobs are placed in the order the files were discovered. The same
    /// input list and cache state always produce the same pack; on a cold
    /// cache shared content is built from the first discovered file.
    Discovery,
}

/// Everything a [`crate::Packer`] needs to know. Nothing is read from the
/// process environment; the caller decides every location up front.
#[derive(Debug, Clone)]
pub struct PackConfig {
    /// The pack file to produce.
    pub destination: PathBuf,

    /// The directory whose regular files are packed.
    pub root: PathBuf,

    /// The directory holding compressed blobs keyed by content hash.
    pub cache_dir: PathBuf,

    /// Number of workers fingerprinting files.
    pub hash_workers: usize,

    /// Number of workers building blobs.
    pub compress_workers: usize,

    /// Number of workers copying blobs into the pack.
    pub write_workers: usize,

    /// The digest used to fingerprint file contents.
    pub algorithm: HashAlgorithm,

    /// The gzip level of newly built blobs. Blobs already in the cache are
    /// reused regardless of the level they were built with.
    pub compression_level: CompressionLevel,

    /// How blobs are ordered in the pack.
    pub layout: LayoutOrder,

    /// When set, a JSON manifest describing every entry is written here after
    /// a successful run.
    pub manifest: Option<PathBuf>,
}

impl PackConfig {
    /// Constructs a configuration with default pool sizes, MD5 fingerprints
    /// and the platform temporary directory as cache.
    pub fn new(destination: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            root: root.into(),
            cache_dir: std::env::temp_dir(),
            hash_workers: DEFAULT_WORKERS,
            compress_workers: DEFAULT_WORKERS,
            write_workers: DEFAULT_WORKERS,
            algorithm: HashAlgorithm::default(),
            compression_level: CompressionLevel::default(),
            layout: LayoutOrder::default(),
            manifest: None,
        }
    }

    /// Sets the cache directory.
    #[must_use]
    pub fn with_cache_dir(self, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..self
        }
    }

    /// Sets the size of all three worker pools at once.
    #[must_use]
    pub fn with_workers(self, workers: usize) -> Self {
        Self {
            hash_workers: workers,
            compress_workers: workers,
            write_workers: workers,
            ..self
        }
    }

    /// Sets the digest algorithm.
    #[must_use]
    pub fn with_algorithm(self, algorithm: HashAlgorithm) -> Self {
        Self { algorithm, ..self }
    }

    /// Sets the gzip level.
    #[must_use]
    pub fn with_compression_level(self, compression_level: CompressionLevel) -> Self {
        Self {
            compression_level,
            ..self
        }
    }

    /// Sets the layout order.
    #[must_use]
    pub fn with_layout(self, layout: LayoutOrder) -> Self {
        Self { layout, ..self }
    }

    /// Requests a manifest at the given path.
    #[must_use]
    pub fn with_manifest(self, manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: Some(manifest.into()),
            ..self
        }
    }

    /// Checks that a pipeline can be built from this configuration.
    pub fn validate(&self) -> Result<(), PackError> {
        for (name, size) in [
            ("hash_workers", self.hash_workers),
            ("compress_workers", self.compress_workers),
            ("write_workers", self.write_workers),
        ] {
            if size == 0 {
                return Err(PackError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        self.compression_level
            .to_gzip_level()
            .map_err(|e| PackError::InvalidConfig(e.to_string()))?;

        Ok(())
    }
}
