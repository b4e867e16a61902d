//! (De)serialization of [`ContentHash`] as `"<algorithm>:<hex>"`.
//!
//! # Example:
//!
//! ```
//! use spack_digest::{ContentHash, HashAlgorithm};
//!
//! let hash = ContentHash::compute(HashAlgorithm::Md5, b"hello world\n");
//! let str = serde_json::to_string(&hash).unwrap();
//! assert_eq!(str, "\"md5:6f5902ac237024bdd0c176cb93063dc4\"");
//! let hash2: ContentHash = serde_json::from_str(&str).unwrap();
//! assert_eq!(hash, hash2);
//! ```
use super::{ContentHash, HashAlgorithm};
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        format!("{}:{self:x}", self.algorithm()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = Cow::<'de, str>::deserialize(deserializer)?;
        let (algorithm, hex) = str
            .split_once(':')
            .ok_or_else(|| Error::custom("expected a digest of the form '<algorithm>:<hex>'"))?;
        let algorithm: HashAlgorithm = algorithm.parse().map_err(Error::custom)?;
        ContentHash::from_hex(algorithm, hex)
            .ok_or_else(|| Error::custom(format!("failed to parse {algorithm} digest")))
    }
}

impl Serialize for HashAlgorithm {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HashAlgorithm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = Cow::<'de, str>::deserialize(deserializer)?;
        str.parse().map_err(Error::custom)
    }
}
