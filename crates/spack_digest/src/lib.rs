#![deny(missing_docs)]

//! Content fingerprints for spack.
//!
//! Every file that enters the pack pipeline is identified by a digest of its
//! full byte content. The digest never depends on the path or on file
//! metadata, so two files with identical bytes always map onto the same
//! [`ContentHash`] and therefore onto the same compressed blob.
//!
//! The algorithm is a configuration choice. [`HashAlgorithm::Md5`] produces a
//! 128 bit fingerprint and is the default; [`HashAlgorithm::Sha256`] is
//! available when collision resistance matters more than speed.
//!
//! # Examples
//!
//! ```
//! use spack_digest::{ContentHash, HashAlgorithm};
//!
//! let hash = ContentHash::compute(HashAlgorithm::Md5, b"hello world\n");
//! assert_eq!(format!("{hash:x}"), "6f5902ac237024bdd0c176cb93063dc4");
//! ```

#[cfg(feature = "serde")]
mod serde;

pub use digest;

use digest::{Digest, Output};
use std::{fmt, fs::File, io::Write, path::Path, str::FromStr};

pub use md5::Md5;
pub use sha2::Sha256;

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = Output<Sha256>;

/// A type alias for the output of an MD5 hash.
pub type Md5Hash = Output<Md5>;

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Parses a hash hex string to a digest.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// The digest algorithm used to fingerprint file contents.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// 128 bit MD5.
    #[default]
    Md5,
    /// 256 bit SHA-2.
    Sha256,
}

impl HashAlgorithm {
    /// The lowercase name of the algorithm as used in manifests and on the
    /// command line.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// The width of a digest produced by this algorithm in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => <Md5 as Digest>::output_size(),
            HashAlgorithm::Sha256 => <Sha256 as Digest>::output_size(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when parsing an unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAlgorithm(pub String);

impl fmt::Display for UnknownAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown hash algorithm '{}', expected 'md5' or 'sha256'",
            self.0
        )
    }
}

impl std::error::Error for UnknownAlgorithm {}

impl FromStr for HashAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

/// A fixed-width fingerprint of a file's full byte content.
///
/// Formatting with `{}` or `{:x}` yields the lowercase hex encoding of the
/// digest, which is also what the blob cache uses to name its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentHash {
    /// An MD5 fingerprint.
    Md5(Md5Hash),
    /// A SHA256 fingerprint.
    Sha256(Sha256Hash),
}

impl ContentHash {
    /// Fingerprints `bytes` with the given algorithm.
    pub fn compute(algorithm: HashAlgorithm, bytes: impl AsRef<[u8]>) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => ContentHash::Md5(compute_bytes_digest::<Md5>(bytes)),
            HashAlgorithm::Sha256 => ContentHash::Sha256(compute_bytes_digest::<Sha256>(bytes)),
        }
    }

    /// Parses the hex encoding of a digest produced by `algorithm`.
    pub fn from_hex(algorithm: HashAlgorithm, str: &str) -> Option<Self> {
        match algorithm {
            HashAlgorithm::Md5 => parse_digest_from_hex::<Md5>(str).map(ContentHash::Md5),
            HashAlgorithm::Sha256 => parse_digest_from_hex::<Sha256>(str).map(ContentHash::Sha256),
        }
    }

    /// The algorithm that produced this fingerprint.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            ContentHash::Md5(_) => HashAlgorithm::Md5,
            ContentHash::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ContentHash::Md5(hash) => hash.as_slice(),
            ContentHash::Sha256(hash) => hash.as_slice(),
        }
    }
}

impl fmt::LowerHex for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::{compute_bytes_digest, compute_file_digest, ContentHash, HashAlgorithm, Md5};
    use rstest::rstest;

    #[test]
    fn test_compute_file_digest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("file.txt");
        std::fs::write(&path, "hello world\n").unwrap();

        let digest = compute_file_digest::<Md5>(&path).unwrap();
        assert_eq!(digest, compute_bytes_digest::<Md5>("hello world\n"));
        assert_eq!(format!("{digest:x}"), "6f5902ac237024bdd0c176cb93063dc4");
    }

    #[rstest]
    #[case(HashAlgorithm::Md5, "", "d41d8cd98f00b204e9800998ecf8427e")]
    #[case(HashAlgorithm::Md5, "hello world\n", "6f5902ac237024bdd0c176cb93063dc4")]
    #[case(
        HashAlgorithm::Sha256,
        "Hello, world!",
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    fn test_compute_content_hash(
        #[case] algorithm: HashAlgorithm,
        #[case] input: &str,
        #[case] expected: &str,
    ) {
        let hash = ContentHash::compute(algorithm, input);
        assert_eq!(format!("{hash:x}"), expected);
        assert_eq!(hash.to_string(), expected);
        assert_eq!(hash.as_bytes().len(), algorithm.digest_len());
        assert_eq!(hash.algorithm(), algorithm);
    }

    #[test]
    fn test_from_hex() {
        let hash = ContentHash::compute(HashAlgorithm::Md5, "1234567890");
        let parsed = ContentHash::from_hex(HashAlgorithm::Md5, &hash.to_string());
        assert_eq!(parsed, Some(hash));

        // A md5 digest is too short to be a sha256 digest.
        assert_eq!(
            ContentHash::from_hex(HashAlgorithm::Sha256, &hash.to_string()),
            None
        );
        assert_eq!(ContentHash::from_hex(HashAlgorithm::Md5, "not hex"), None);
    }

    #[rstest]
    #[case("md5", HashAlgorithm::Md5)]
    #[case("MD5", HashAlgorithm::Md5)]
    #[case("sha256", HashAlgorithm::Sha256)]
    fn test_parse_algorithm(#[case] input: &str, #[case] expected: HashAlgorithm) {
        assert_eq!(input.parse::<HashAlgorithm>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        let err = "crc32".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown hash algorithm 'crc32', expected 'md5' or 'sha256'"
        );
    }
}
