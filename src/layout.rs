//! On-disk naming inside the cache directory.
//!
//! The cache is a single flat directory:
//!
//! ```text
//! <directory>/
//! ├── sha256:4e67...            # layer blob
//! ├── sha256:9a1b....config     # config blob
//! ├── sha256:4e67....compressed     # variant link, content "sha256:77c0..."
//! ├── sha256:77c0....decompressed   # variant link, content "sha256:4e67..."
//! └── .blob-XXXXXX              # in-flight write, renamed into place when complete
//! ```
//!
//! Every name is a pure function of its inputs; nothing here touches the filesystem.

use std::path::{Path, PathBuf};

use crate::{digest::ContentDigest, variant::VariantKind};

pub(crate) const CONFIG_SUFFIX: &str = ".config";
pub(crate) const COMPRESSED_SUFFIX: &str = ".compressed";
pub(crate) const DECOMPRESSED_SUFFIX: &str = ".decompressed";

/// Prefix of temporary files; a leading dot keeps them out of the digest namespace.
pub(crate) const TEMP_PREFIX: &str = ".blob-";

/// The filename a blob is stored under.
///
/// Config blobs get a distinct name so that a config object and a layer can never
/// overwrite each other, even if they were to share a digest.
pub fn blob_filename(digest: &ContentDigest, is_config: bool) -> String {
    if is_config {
        format!("{digest}{CONFIG_SUFFIX}")
    } else {
        digest.to_string()
    }
}

/// The filename of the variant link side file owned by `digest`.
pub fn variant_filename(digest: &ContentDigest, kind: VariantKind) -> String {
    let suffix = match kind {
        VariantKind::Compressed => COMPRESSED_SUFFIX,
        VariantKind::Decompressed => DECOMPRESSED_SUFFIX,
    };
    format!("{digest}{suffix}")
}

pub(crate) fn blob_path(directory: &Path, digest: &ContentDigest, is_config: bool) -> PathBuf {
    directory.join(blob_filename(digest, is_config))
}

pub(crate) fn variant_path(directory: &Path, digest: &ContentDigest, kind: VariantKind) -> PathBuf {
    directory.join(variant_filename(digest, kind))
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::digest::DigestAlgorithm;

    #[test]
    fn test_filenames_are_distinct() {
        let digest = ContentDigest::compute(DigestAlgorithm::Sha256, b"layer");
        let names = [
            blob_filename(&digest, false),
            blob_filename(&digest, true),
            variant_filename(&digest, VariantKind::Compressed),
            variant_filename(&digest, VariantKind::Decompressed),
        ];
        assert_eq!(names[0], digest.as_str());
        assert_eq!(names[1], format!("{digest}.config"));
        assert_eq!(names[2], format!("{digest}.compressed"));
        assert_eq!(names[3], format!("{digest}.decompressed"));
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let digest = ContentDigest::compute(DigestAlgorithm::Sha512, b"config");
        assert_eq!(blob_filename(&digest, true), blob_filename(&digest.clone(), true));
        assert_eq!(
            blob_path(Path::new("/cache"), &digest, false),
            PathBuf::from(format!("/cache/{digest}"))
        );
    }

    #[test]
    fn test_empty_digest() {
        let empty = ContentDigest::default();
        assert_eq!(blob_filename(&empty, false), "");
        assert_eq!(blob_filename(&empty, true), ".config");
    }
}
