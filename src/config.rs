//! Construction options for a blob cache.
//!
//! Hosts that keep their settings in TOML can deserialize a [`CacheOptions`] directly:
//! ```toml
//! directory = "/var/cache/blobs"
//! compression = "compress"
//! ```
//!
//! `compression` is one of `compress`, `decompress` or `preserve-original`, and defaults
//! to `preserve-original`.  The directory itself is provisioned by the host.

use std::path::PathBuf;

use serde::Deserialize;

use crate::compression::CompressionPolicy;

/// Settings a [`BlobCache`](crate::BlobCache) is built from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheOptions {
    /// Cache directory; must already exist.
    pub directory: PathBuf,

    /// Which blob representation readers should prefer.
    #[serde(default)]
    pub compression: CompressionPolicy,
}

impl CacheOptions {
    /// Parse options from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is invalid or names an unknown policy.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_basic_config() {
        let config = CacheOptions::from_toml(r#"directory = "/var/cache/blobs""#).unwrap();
        assert_eq!(config.directory, PathBuf::from("/var/cache/blobs"));
        assert_eq!(config.compression, CompressionPolicy::PreserveOriginal);
    }

    #[test]
    fn test_parse_with_compression() {
        let config_str = r#"
directory = "/var/cache/blobs"
compression = "decompress"
"#;
        let config = CacheOptions::from_toml(config_str).unwrap();
        assert_eq!(config.compression, CompressionPolicy::Decompress);
    }

    #[test]
    fn test_unknown_policy() {
        let config_str = r#"
directory = "/var/cache/blobs"
compression = "bzip2"
"#;
        assert!(CacheOptions::from_toml(config_str).is_err());
    }
}
