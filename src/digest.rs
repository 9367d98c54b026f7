//! Content digests.
//!
//! A [`ContentDigest`] is the canonical `algorithm:hex` form used by OCI registries, for
//! example `sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae`.
//! Parsing only accepts algorithms we can actually verify, with lowercase hex of the
//! correct length, so a parsed digest is always safe to use as a single filename.

use core::{fmt, str::FromStr};

use sha2::{Digest, Sha256, Sha512};

use crate::error::{CacheError, Result};

/// Hash algorithms a [`ContentDigest`] may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// The algorithm prefix, as it appears before the `:`.
    pub const fn id(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    const fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    fn from_id(id: &str) -> Option<Self> {
        match id {
            "sha256" => Some(DigestAlgorithm::Sha256),
            "sha512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Start an incremental hash with this algorithm.
    pub fn hasher(self) -> DigestHasher {
        match self {
            DigestAlgorithm::Sha256 => DigestHasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => DigestHasher::Sha512(Sha512::new()),
        }
    }
}

/// A content digest in canonical `algorithm:hex` form.
///
/// The default value is the empty digest, which never names stored content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Parse and validate a digest string.  The empty string yields the empty digest.
    pub fn parse(digest: &str) -> Result<Self> {
        if digest.is_empty() {
            return Ok(Self::default());
        }

        let invalid = |reason| CacheError::InvalidDigest {
            digest: digest.to_string(),
            reason,
        };

        let Some((id, hex)) = digest.split_once(':') else {
            return Err(invalid("missing algorithm separator"));
        };
        let algorithm =
            DigestAlgorithm::from_id(id).ok_or_else(|| invalid("unsupported algorithm"))?;
        if hex.len() != algorithm.hex_len() {
            return Err(invalid("wrong length for algorithm"));
        }
        if !hex.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid("not lowercase hex"));
        }

        Ok(Self(digest.to_string()))
    }

    /// Hash `data` in one shot.
    pub fn compute(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The algorithm, or `None` for the empty digest.
    pub fn algorithm(&self) -> Option<DigestAlgorithm> {
        self.0
            .split_once(':')
            .and_then(|(id, _)| DigestAlgorithm::from_id(id))
    }

    /// The hex-encoded hash, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, hex)| hex)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentDigest {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&oci_spec::image::Digest> for ContentDigest {
    type Error = CacheError;

    fn try_from(digest: &oci_spec::image::Digest) -> Result<Self> {
        Self::parse(&digest.to_string())
    }
}

/// Incremental hasher producing a [`ContentDigest`].
#[derive(Clone)]
pub enum DigestHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestHasher::Sha256(h) => h.update(data),
            DigestHasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finish(self) -> ContentDigest {
        let (algorithm, hex) = match self {
            DigestHasher::Sha256(h) => (DigestAlgorithm::Sha256, hex::encode(h.finalize())),
            DigestHasher::Sha512(h) => (DigestAlgorithm::Sha512, hex::encode(h.finalize())),
        };
        ContentDigest(format!("{}:{hex}", algorithm.id()))
    }
}

impl fmt::Debug for DigestHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self {
            DigestHasher::Sha256(_) => DigestAlgorithm::Sha256,
            DigestHasher::Sha512(_) => DigestAlgorithm::Sha512,
        };
        f.debug_tuple("DigestHasher").field(&algorithm).finish()
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_compute() {
        assert_eq!(
            ContentDigest::compute(DigestAlgorithm::Sha256, b"hello").as_str(),
            HELLO
        );
        let sha512 = ContentDigest::compute(DigestAlgorithm::Sha512, b"hello");
        assert_eq!(sha512.algorithm(), Some(DigestAlgorithm::Sha512));
        assert_eq!(sha512.hex().len(), 128);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = DigestAlgorithm::Sha256.hasher();
        hasher.update(b"he");
        hasher.update(b"llo");
        assert_eq!(hasher.finish().as_str(), HELLO);
    }

    #[test]
    fn test_parse() {
        let digest = ContentDigest::parse(HELLO).unwrap();
        assert_eq!(digest.algorithm(), Some(DigestAlgorithm::Sha256));
        assert_eq!(digest.hex(), &HELLO[7..]);
        assert_eq!(digest.to_string(), HELLO);

        let empty: ContentDigest = "".parse().unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.algorithm(), None);
        assert_eq!(empty.hex(), "");

        fn assert_invalid(x: &str) {
            assert!(matches!(
                ContentDigest::parse(x),
                Err(CacheError::InvalidDigest { .. })
            ));
        }

        // no algorithm
        assert_invalid(&HELLO[7..]);
        // something randomly wrong
        assert_invalid("../etc/shadow");
        // unknown algorithm
        assert_invalid("md5:5d41402abc4b2a76b9719d911017c592");
        // too short
        assert_invalid(&HELLO[..HELLO.len() - 1]);
        // uppercase
        assert_invalid(&HELLO.to_uppercase().replace("SHA256", "sha256"));
        // path separator smuggled in
        assert_invalid(&format!("{}/", &HELLO[..HELLO.len() - 1]));
    }
}
