use std::path::PathBuf;

use tokio::task::JoinError;

/// An error that might occur while packing files.
///
/// Only the first error raised anywhere in the pipeline is reported. Workers
/// that stop because another worker failed report [`PackError::Cancelled`],
/// which is never surfaced when a real error is available.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// The configuration cannot be used to build a pipeline.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The root directory could not be enumerated.
    #[error("failed to discover files")]
    Discovery(#[source] walkdir::Error),

    /// A source file could not be read for hashing.
    #[error("failed to read '{}'", .0.display())]
    Read(PathBuf, #[source] std::io::Error),

    /// A blob could not be built from a source file.
    #[error("failed to compress '{}'", .0.display())]
    Compress(PathBuf, #[source] std::io::Error),

    /// A finished blob could not be installed in the cache.
    #[error("failed to install the blob for '{}' in the cache", .0.display())]
    Install(PathBuf, #[source] std::io::Error),

    /// A blob could not be copied into the destination pack.
    #[error("failed to write '{}' into the pack", .0.display())]
    Write(PathBuf, #[source] std::io::Error),

    /// The manifest could not be written.
    #[error("failed to write the manifest to '{}'", .0.display())]
    Manifest(PathBuf, #[source] std::io::Error),

    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl PackError {
    /// Returns true if this is a secondary error caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PackError::Cancelled)
    }
}

impl From<JoinError> for PackError {
    fn from(err: JoinError) -> Self {
        if let Ok(panic) = err.try_into_panic() {
            std::panic::resume_unwind(panic)
        } else {
            PackError::Cancelled
        }
    }
}
