//! Functionality for writing and reading single-entry blobs.
//!
//! A blob is a gzip member that wraps exactly one tar entry: a header that
//! carries the source path, permission bits, size and modification time,
//! followed by the file bytes padded to the tar block size.
//!
//! The tar stream is deliberately *not* terminated with the two zero blocks
//! that normally mark the end of an archive. Blobs are concatenated into a
//! pack, and a consumer that stops at the first end marker would never see
//! the entries behind it. The gzip member itself is always finalized, so
//! every blob can be decompressed on its own once its boundaries are known.

use std::borrow::Cow;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::{read::GzDecoder, write::GzEncoder};
use tar::{EntryType, Header};

use crate::config::CompressionLevel;

const BLOCK_SIZE: u64 = 512;

/// The width of the name field of a tar header.
const NAME_FIELD_LEN: usize = 100;

const LONG_LINK_NAME: &[u8] = b"././@LongLink";

/// The decoded contents of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// The path of the source file as it was recorded.
    pub path: PathBuf,
    /// The permission bits of the source file.
    pub mode: u32,
    /// The size of the source file.
    pub size: u64,
    /// The modification time of the source file in seconds since the epoch.
    pub mtime: u64,
    /// The content of the source file.
    pub contents: Vec<u8>,
}

/// Writes a blob for the file at `source` into `writer` and returns the
/// writer once the gzip member has been finished.
///
/// The path is recorded verbatim, so absolute paths and paths containing
/// `..` survive unchanged.
pub fn write_blob<W: Write>(
    writer: W,
    source: &Path,
    compression_level: CompressionLevel,
) -> std::io::Result<W> {
    let mut file = fs_err::File::open(source)?;
    let metadata = file.metadata()?;

    let mut header = prepare_header(&metadata)?;
    let mut encoder = GzEncoder::new(writer, compression_level.to_gzip_level()?);
    append_unterminated(&mut encoder, &mut header, &path_bytes(source), &mut file)?;
    encoder.finish()
}

fn prepare_header(metadata: &std::fs::Metadata) -> std::io::Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(metadata.len());
    header.set_mode(mode_bits(metadata));
    header.set_mtime(
        metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs()),
    );
    header.set_uid(0);
    header.set_gid(0);
    Ok(header)
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(path.to_string_lossy().replace('\\', "/").into_bytes())
}

/// Appends one entry to `out` without the end-of-archive trailer.
///
/// Names that do not fit the header are stored in a preceding GNU long name
/// record, the same way `tar::Builder` would store them.
fn append_unterminated(
    out: &mut impl Write,
    header: &mut Header,
    name: &[u8],
    data: &mut impl Read,
) -> std::io::Result<()> {
    if name.len() > NAME_FIELD_LEN {
        let mut long = Header::new_gnu();
        long.as_old_mut().name[..LONG_LINK_NAME.len()].copy_from_slice(LONG_LINK_NAME);
        long.set_mode(0o644);
        long.set_uid(0);
        long.set_gid(0);
        long.set_mtime(0);
        long.set_size(name.len() as u64 + 1);
        long.set_entry_type(EntryType::GNULongName);
        long.set_cksum();

        out.write_all(long.as_bytes())?;
        out.write_all(name)?;
        out.write_all(&[0])?;
        pad_block(out, name.len() as u64 + 1)?;
    }

    let truncated = name.len().min(NAME_FIELD_LEN);
    header.as_old_mut().name[..truncated].copy_from_slice(&name[..truncated]);
    header.set_cksum();
    out.write_all(header.as_bytes())?;

    let size = header.size()?;
    let copied = std::io::copy(&mut data.take(size), out)?;
    if copied != size {
        return Err(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("file shrank while it was archived: expected {size} bytes, read {copied}"),
        ));
    }
    pad_block(out, size)
}

fn pad_block(out: &mut impl Write, len: u64) -> std::io::Result<()> {
    let remainder = len % BLOCK_SIZE;
    if remainder != 0 {
        let zeros = [0u8; BLOCK_SIZE as usize];
        out.write_all(&zeros[..(BLOCK_SIZE - remainder) as usize])?;
    }
    Ok(())
}

/// Decodes a single blob from `reader`.
///
/// Only the first gzip member is consumed, which makes this usable on a
/// reader positioned at the start of a blob inside a pack.
pub fn read_blob(reader: impl Read) -> std::io::Result<BlobEntry> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut entry = archive.entries()?.next().ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidData, "the blob does not contain an entry")
    })??;

    let path = entry.path()?.into_owned();
    let mode = entry.header().mode()?;
    let mtime = entry.header().mtime()?;
    let size = entry.size();

    let mut contents = Vec::with_capacity(usize::try_from(size).unwrap_or_default());
    entry.read_to_end(&mut contents)?;

    Ok(BlobEntry {
        path,
        mode,
        size,
        mtime,
        contents,
    })
}

/// Reads only the entry name of the blob in `reader`, without decompressing
/// the file contents.
pub fn read_blob_name(reader: impl Read) -> std::io::Result<PathBuf> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let entry = archive.entries()?.next().ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidData, "the blob does not contain an entry")
    })??;
    Ok(entry.path()?.into_owned())
}

/// Decodes the blob stored at `offset` in the pack at `pack`. The size of the
/// blob must be known from an external source such as a manifest.
pub fn read_blob_at(pack: &Path, offset: u64, size: u64) -> std::io::Result<BlobEntry> {
    let mut file = fs_err::File::open(pack)?;
    file.seek(SeekFrom::Start(offset))?;
    read_blob(BufReader::new(file.take(size)))
}
