//! Finding the files to pack.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::{group::send_blocking, types::DiscoveredFile, PackError};

/// Where the files of a run come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Every regular file below a root directory.
    Walk(PathBuf),
    /// An explicit list of paths, used as given.
    List(Vec<PathBuf>),
}

/// Enumerates the regular files below `root`. Symbolic links are not
/// followed, and directories, links, devices and sockets are skipped.
pub fn regular_files(root: &Path) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
}

/// Paths that must never be packed, such as the pack itself when it is
/// written below the scanned root.
#[derive(Debug, Default)]
pub(crate) struct Exclusions {
    paths: Vec<(OsString, PathBuf)>,
}

impl Exclusions {
    /// Excludes `path`. The path has to exist so it can be canonicalized.
    pub fn add(&mut self, path: &Path) {
        if let (Some(name), Ok(canonical)) = (path.file_name(), fs_err::canonicalize(path)) {
            self.paths.push((name.to_os_string(), canonical));
        }
    }

    fn contains(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        // Only canonicalize when the cheap name comparison matches.
        self.paths.iter().any(|(excluded_name, excluded)| {
            excluded_name == name
                && fs_err::canonicalize(path).is_ok_and(|canonical| &canonical == excluded)
        })
    }
}

/// Feeds discovered files into `output` in discovery order. Runs on a
/// blocking thread and stops once the run is cancelled or the receiving
/// stage has gone away.
pub(crate) fn produce(
    source: FileSource,
    exclusions: &Exclusions,
    output: flume::Sender<DiscoveredFile>,
    cancel: &CancellationToken,
) -> Result<(), PackError> {
    let paths: Box<dyn Iterator<Item = Result<PathBuf, PackError>> + '_> = match source {
        FileSource::Walk(root) => Box::new(
            regular_files(&root)
                .map(|entry| entry.map_err(PackError::Discovery))
                .filter(|entry| !matches!(entry, Ok(path) if exclusions.contains(path))),
        ),
        FileSource::List(paths) => Box::new(paths.into_iter().map(Ok)),
    };

    let mut count = 0;
    for (index, path) in paths.enumerate() {
        send_blocking(&output, DiscoveredFile { index, path: path? }, cancel)?;
        count += 1;
    }

    tracing::debug!("discovered {count} files");
    Ok(())
}
