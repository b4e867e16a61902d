//! An optional index of the entries in a pack.
//!
//! A pack on its own is just blobs laid back to back; without knowing where
//! each blob starts and ends it cannot be split again. The manifest records
//! exactly that, one entry per input file, and is only written on request.

use std::{
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use spack_digest::{ContentHash, HashAlgorithm};

use crate::{blob::BlobEntry, PackReport};

/// The JSON document describing a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// The manifest format version.
    pub version: u32,

    /// The digest used to fingerprint the entries.
    pub algorithm: HashAlgorithm,

    /// The size of the pack in bytes.
    pub total_size: u64,

    /// One entry per packed file, in discovery order.
    pub entries: Vec<ManifestEntry>,
}

/// Where one input file ended up in the pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The path of the source file as it was discovered.
    pub path: PathBuf,

    /// The fingerprint of the file's content.
    pub hash: ContentHash,

    /// The entry name inside the blob. Files that share content share a
    /// blob, and with it the name of whichever file the blob was built from.
    pub stored_as: PathBuf,

    /// The offset of the blob in the pack.
    pub offset: u64,

    /// The size of the blob in the pack.
    pub size: u64,
}

impl Manifest {
    /// The version written by this crate.
    pub const VERSION: u32 = 1;

    /// Builds a manifest from the report of a successful run.
    pub fn from_report(report: &PackReport) -> Self {
        let mut entries: Vec<_> = report.entries.iter().collect();
        entries.sort_by_key(|entry| entry.index);
        Self {
            version: Self::VERSION,
            algorithm: report.algorithm,
            total_size: report.total_size,
            entries: entries
                .into_iter()
                .map(|entry| ManifestEntry {
                    path: entry.source.clone(),
                    hash: entry.hash,
                    stored_as: entry.stored_as.clone(),
                    offset: entry.offset,
                    size: entry.size,
                })
                .collect(),
        }
    }

    /// Reads a manifest from disk.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let file = fs_err::File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Writes the manifest to `path`. The file is replaced atomically so a
    /// reader never sees a half written manifest.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = tempfile::NamedTempFile::new_in(parent)?;
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        drop(writer);
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Decodes the blob of `entry` from the pack at `pack`.
    pub fn read_entry(&self, pack: &Path, entry: &ManifestEntry) -> std::io::Result<BlobEntry> {
        crate::blob::read_blob_at(pack, entry.offset, entry.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackedEntry;

    fn report() -> PackReport {
        let hash = ContentHash::compute(HashAlgorithm::Md5, b"hello world\n");
        PackReport {
            algorithm: HashAlgorithm::Md5,
            total_size: 40,
            unique_blobs: 1,
            entries: vec![
                PackedEntry {
                    index: 0,
                    source: PathBuf::from("root/a.txt"),
                    hash,
                    stored_as: PathBuf::from("root/a.txt"),
                    offset: 0,
                    size: 40,
                    deduplicated: false,
                },
                PackedEntry {
                    index: 1,
                    source: PathBuf::from("root/b.txt"),
                    hash,
                    stored_as: PathBuf::from("root/a.txt"),
                    offset: 0,
                    size: 40,
                    deduplicated: true,
                },
            ],
        }
    }

    #[test]
    fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pack.json");

        let manifest = Manifest::from_report(&report());
        manifest.write_to(&path).unwrap();
        assert_eq!(Manifest::from_path(&path).unwrap(), manifest);
    }

    #[test]
    fn test_json_layout() {
        let json = serde_json::to_value(Manifest::from_report(&report())).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["algorithm"], "md5");
        assert_eq!(json["total_size"], 40);
        assert_eq!(json["entries"][1]["path"], "root/b.txt");
        assert_eq!(json["entries"][1]["stored_as"], "root/a.txt");
        assert_eq!(
            json["entries"][1]["hash"],
            "md5:6f5902ac237024bdd0c176cb93063dc4"
        );
    }
}
