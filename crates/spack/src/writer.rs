//! The positional writer stage.
//!
//! Every worker opens the destination independently, seeks to the range it
//! was granted and copies the blob there. There is no locking: the granted
//! ranges never overlap.

use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::{
    group::{recv, send},
    offsets::WriteGrant,
    types::{PackedEntry, PlacedBlob},
    PackError,
};

/// Copies the blob at `blob` into `destination` at the range granted by
/// `grant`. Exactly `grant.range().len()` bytes are copied.
pub async fn write_range(
    destination: &Path,
    blob: &Path,
    grant: WriteGrant,
) -> std::io::Result<()> {
    let range = grant.range();

    let mut dest = fs_err::tokio::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(destination)
        .await?;
    dest.seek(SeekFrom::Start(range.offset())).await?;

    let source = fs_err::tokio::File::open(blob).await?;
    let copied = tokio::io::copy(&mut source.take(range.len()), &mut dest).await?;
    if copied != range.len() {
        return Err(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!(
                "blob '{}' holds {copied} bytes but {} were assigned",
                blob.display(),
                range.len()
            ),
        ));
    }

    dest.flush().await?;
    Ok(())
}

/// A single writer. Pulls placed blobs until the queue closes and reports
/// every finished entry to the completion log.
pub(crate) async fn worker(
    input: flume::Receiver<PlacedBlob>,
    output: flume::Sender<PackedEntry>,
    destination: PathBuf,
    cancel: CancellationToken,
) -> Result<(), PackError> {
    while let Some(mut placed) = recv(&input, &cancel).await? {
        let deduplicated = match placed.take_grant() {
            Some(grant) => {
                write_range(&destination, &placed.file.blob_path, grant)
                    .await
                    .map_err(|e| PackError::Write(placed.file.source.clone(), e))?;
                tracing::trace!(
                    "wrote {} to {}..{}",
                    placed.file.source.display(),
                    placed.range.offset(),
                    placed.range.end()
                );
                false
            }
            None => true,
        };
        send(&output, placed.into_entry(deduplicated), &cancel).await?;
    }
    Ok(())
}
