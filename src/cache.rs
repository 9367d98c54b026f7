//! The cache store.
//!
//! [`BlobCache`] wraps an image reference and a cache directory.  Identity and lifecycle
//! operations are forwarded to the wrapped reference unchanged; blob reads on images
//! opened through the cache are served from the directory when possible, and blobs
//! fetched from the remote side are written through to it.
//!
//! # Concurrency
//!
//! The directory may be used concurrently by many threads and many processes.  There is
//! no locking: every entry is created by renaming a complete temporary file into place,
//! so readers observe either absence or the full content.  [`BlobCache::clear_cache`]
//! races with writers; an entry written during a clear may or may not survive it.

use std::{
    fs,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use log::{debug, warn};

use crate::{
    compression::{variant_reader, Compression, CompressionPolicy},
    config::CacheOptions,
    digest::ContentDigest,
    error::{CacheError, Result},
    layout::blob_path,
    probe::{probe_blob, BlobDescriptor},
    reference::{open_image_from_reference, ImageHandle, ImageReference, SystemContext},
    source::CachedSource,
    util::NotFoundFilter,
    variant::{record_variant, resolve_for_policy, resolve_variant, ResolvedBlob, VariantKind},
    writer::BlobWriter,
};

/// A write-through blob cache around an image reference.
#[derive(Debug)]
pub struct BlobCache<R> {
    reference: Arc<R>,
    // WARNING: The contents of this directory may be accessed concurrently,
    // both within this process and by multiple different processes
    directory: PathBuf,
    compression: CompressionPolicy,
}

impl<R> Clone for BlobCache<R> {
    fn clone(&self) -> Self {
        Self {
            reference: Arc::clone(&self.reference),
            directory: self.directory.clone(),
            compression: self.compression,
        }
    }
}

impl<R> BlobCache<R> {
    /// Wraps `reference` with a cache in `directory`.
    ///
    /// The directory must already exist; nothing is created or checked on disk here.
    pub fn new(
        reference: Arc<R>,
        directory: impl Into<PathBuf>,
        compression: CompressionPolicy,
    ) -> Result<Self> {
        let directory = directory.into();
        if directory.as_os_str().is_empty() {
            return Err(CacheError::Configuration(
                "no cache directory specified".to_string(),
            ));
        }
        Ok(Self {
            reference,
            directory,
            compression,
        })
    }

    pub fn from_options(reference: Arc<R>, options: &CacheOptions) -> Result<Self> {
        Self::new(reference, &options.directory, options.compression)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn compression(&self) -> CompressionPolicy {
        self.compression
    }

    /// The wrapped reference.
    pub fn reference(&self) -> &Arc<R> {
        &self.reference
    }

    /// Whether `blob` is cached, and if so its stored size.
    pub fn has_blob(&self, blob: &BlobDescriptor) -> Result<Option<u64>> {
        probe_blob(&self.directory, blob)
    }

    /// Finds what should be served for `blob` under this cache's compression policy.
    pub fn resolve_blob(&self, blob: &BlobDescriptor) -> Result<Option<ResolvedBlob>> {
        resolve_for_policy(&self.directory, blob, self.compression)
    }

    /// Removes every entry in the cache directory.
    ///
    /// Entries are removed in name order.  Stops at the first entry that can't be
    /// removed; entries removed before that stay removed.  Entries that vanish on their
    /// own mid-sweep are not an error.
    pub fn clear_cache(&self) -> Result<()> {
        clear_directory(&self.directory, remove_all)
    }

    /// Stores `content` as `blob`, verifying it against `blob.digest`.
    ///
    /// Returns the stored size.
    pub fn store_blob(&self, blob: &BlobDescriptor, content: &mut impl Read) -> Result<u64> {
        let mut writer = BlobWriter::create(&self.directory, &blob.digest, blob.is_config)?;
        io::copy(content, &mut writer)
            .map_err(|e| CacheError::io("writing blob into", &self.directory, e))?;
        let (_, size) = writer.commit()?;
        Ok(size)
    }

    /// Records that the `kind` variant of `owner` is stored under `target`.
    pub fn record_variant(
        &self,
        owner: &ContentDigest,
        kind: VariantKind,
        target: &ContentDigest,
    ) -> Result<()> {
        record_variant(&self.directory, owner, kind, target)
    }

    /// Reads the `kind` link of `owner`.  The target is not checked.
    pub fn resolve_variant(
        &self,
        owner: &ContentDigest,
        kind: VariantKind,
    ) -> Result<Option<ContentDigest>> {
        resolve_variant(&self.directory, owner, kind)
    }

    /// Makes sure the policy-preferred variant of the stored layer `digest` exists.
    ///
    /// Produces the variant if needed and links it with the original in both directions.
    /// Returns the variant's digest, or `None` if the policy wants the original or the
    /// layer is already in the preferred form.
    pub fn ensure_variant(&self, digest: &ContentDigest) -> Result<Option<ContentDigest>> {
        let Some(kind) = self.compression.preferred_variant() else {
            return Ok(None);
        };
        let Some(algorithm) = digest.algorithm() else {
            return Ok(None);
        };

        if let Some(target) = self.resolve_variant(digest, kind)? {
            if self.has_blob(&BlobDescriptor::new(target.clone()))?.is_some() {
                return Ok(Some(target));
            }
        }

        let path = blob_path(&self.directory, digest, false);
        let Some(file) = fs::File::open(&path)
            .filter_not_found()
            .map_err(|e| CacheError::io("opening", &path, e))?
        else {
            return Ok(None);
        };
        let mut file = BufReader::new(file);
        let format = sniff(&mut file).map_err(|e| CacheError::io("reading", &path, e))?;

        let Some(mut variant) =
            variant_reader(format, kind, file).map_err(|e| CacheError::io("reading", &path, e))?
        else {
            return Ok(None);
        };

        let mut writer = BlobWriter::create_computed(&self.directory, algorithm)?;
        io::copy(&mut variant, &mut writer)
            .map_err(|e| CacheError::io("producing variant of", &path, e))?;
        let (target, size) = writer.commit()?;

        self.record_variant(digest, kind, &target)?;
        self.record_variant(&target, kind.inverse(), digest)?;
        debug!("{digest}: {kind:?} variant {target} ({size} bytes)");
        Ok(Some(target))
    }

    /// Like [`Self::ensure_variant`], but a failure only costs the variant.
    pub(crate) fn ensure_variant_or_warn(&self, digest: &ContentDigest) {
        if let Err(err) = self.ensure_variant(digest) {
            warn!("not producing a variant of {digest}: {err}");
        }
    }
}

impl<R: ImageReference> BlobCache<R> {
    /// Opens the image with this cache as its reference, so that blob reads on the
    /// returned handle go through the cache.
    pub async fn open_image(
        &self,
        sys: &SystemContext,
    ) -> anyhow::Result<ImageHandle<CachedSource<R>>> {
        open_image_from_reference(self, sys).await
    }
}

impl<R: ImageReference> ImageReference for BlobCache<R> {
    type Source = CachedSource<R>;

    fn transport(&self) -> &str {
        self.reference.transport()
    }

    fn string_within_transport(&self) -> String {
        self.reference.string_within_transport()
    }

    fn docker_reference(&self) -> Option<String> {
        self.reference.docker_reference()
    }

    fn policy_configuration_identity(&self) -> String {
        self.reference.policy_configuration_identity()
    }

    fn policy_configuration_namespaces(&self) -> Vec<String> {
        self.reference.policy_configuration_namespaces()
    }

    async fn delete_image(&self, sys: &SystemContext) -> anyhow::Result<()> {
        self.reference.delete_image(sys).await
    }

    async fn new_image_source(&self, sys: &SystemContext) -> anyhow::Result<CachedSource<R>> {
        let remote = self
            .reference
            .new_image_source(sys)
            .await
            .context("Opening remote image source")?;
        Ok(CachedSource::new(self.clone(), remote))
    }
}

fn sniff(reader: &mut impl BufRead) -> io::Result<Compression> {
    Ok(Compression::detect(reader.fill_buf()?))
}

fn clear_directory(
    directory: &Path,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> Result<()> {
    let entries = fs::read_dir(directory)
        .map_err(|e| CacheError::io("opening cache directory", directory, e))?;
    let mut names = entries
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| CacheError::io("reading cache directory", directory, e))?;
    names.sort();

    debug!(
        "clearing {} entries from {}",
        names.len(),
        directory.display()
    );
    for name in names {
        let path = directory.join(name);
        remove(&path).map_err(|source| CacheError::Clear { path, source })?;
    }
    Ok(())
}

fn remove_all(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    result.filter_not_found().map(|_| ())
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::{digest::DigestAlgorithm, test::tempdir};

    /// Stands in for a remote reference; these tests never reach it.
    #[derive(Debug)]
    struct Unreachable;

    fn cache(directory: &Path, compression: CompressionPolicy) -> BlobCache<Unreachable> {
        BlobCache::new(Arc::new(Unreachable), directory, compression).unwrap()
    }

    fn put(cache: &BlobCache<Unreachable>, data: &[u8], is_config: bool) -> BlobDescriptor {
        let digest = ContentDigest::compute(DigestAlgorithm::Sha256, data);
        let mut blob = BlobDescriptor::new(digest);
        blob.is_config = is_config;
        let size = cache.store_blob(&blob, &mut &data[..]).unwrap();
        assert_eq!(size, data.len() as u64);
        blob.with_size(size)
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(
            BlobCache::new(Arc::new(Unreachable), "", CompressionPolicy::PreserveOriginal),
            Err(CacheError::Configuration(_))
        ));

        // no I/O at construction time
        let cache = cache(Path::new("/nonexistent/cache"), CompressionPolicy::Compress);
        assert_eq!(cache.directory(), Path::new("/nonexistent/cache"));
        assert_eq!(cache.compression(), CompressionPolicy::Compress);
    }

    #[test]
    fn test_has_blob() {
        let dir = tempdir();
        let cache = cache(dir.path(), CompressionPolicy::PreserveOriginal);
        let layer = put(&cache, b"layer data", false);
        let config = put(&cache, b"{\"config\":true}", true);

        assert_eq!(cache.has_blob(&layer).unwrap(), Some(10));
        assert_eq!(cache.has_blob(&config).unwrap(), Some(15));

        let mut wrong_size = layer.clone();
        wrong_size.size = Some(11);
        assert_eq!(cache.has_blob(&wrong_size).unwrap(), None);

        let mut unknown_size = layer;
        unknown_size.size = None;
        assert_eq!(cache.has_blob(&unknown_size).unwrap(), Some(10));
    }

    #[test]
    fn test_clear_cache() {
        let dir = tempdir();
        let cache = cache(dir.path(), CompressionPolicy::Compress);
        let blobs = [
            put(&cache, b"one", false),
            put(&cache, b"two", true),
            put(&cache, &b"three".repeat(1000), false),
        ];
        cache.ensure_variant(&blobs[2].digest).unwrap().unwrap();
        fs::create_dir(dir.path().join("stray")).unwrap();
        fs::write(dir.path().join("stray/file"), b"").unwrap();

        cache.clear_cache().unwrap();

        for blob in &blobs {
            assert_eq!(cache.has_blob(blob).unwrap(), None);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        // clearing an empty cache is fine
        cache.clear_cache().unwrap();
    }

    #[test]
    fn test_clear_missing_directory() {
        let dir = tempdir();
        let cache = cache(&dir.path().join("missing"), CompressionPolicy::Compress);
        let err = cache.clear_cache().unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }), "{err:?}");
    }

    #[test]
    fn test_clear_stops_at_first_failure() {
        let dir = tempdir();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let err = clear_directory(dir.path(), |path| {
            if path.ends_with("b") {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                remove_all(path)
            }
        })
        .unwrap_err();
        let (path, source) = match err {
            CacheError::Clear { path, source } => (path, source),
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(path, dir.path().join("b"));
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);

        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
        assert!(dir.path().join("c").exists());
    }

    #[test]
    fn test_clear_tolerates_vanished_entries() {
        let dir = tempdir();
        fs::write(dir.path().join("a"), b"").unwrap();
        fs::write(dir.path().join("b"), b"").unwrap();

        // another process clears "b" while we're busy with "a"
        clear_directory(dir.path(), |path| {
            if path.ends_with("a") {
                remove_all(&dir.path().join("b"))?;
            }
            remove_all(path)
        })
        .unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_store_rejects_wrong_content() {
        let dir = tempdir();
        let cache = cache(dir.path(), CompressionPolicy::PreserveOriginal);
        let blob = BlobDescriptor::new(ContentDigest::compute(DigestAlgorithm::Sha256, b"good"));
        let err = cache.store_blob(&blob, &mut &b"evil"[..]).unwrap_err();
        assert!(matches!(err, CacheError::DigestMismatch { .. }), "{err:?}");
        assert_eq!(cache.has_blob(&blob).unwrap(), None);
    }

    #[test]
    fn test_ensure_variant_compress() {
        let dir = tempdir();
        let cache = cache(dir.path(), CompressionPolicy::Compress);
        let plain = b"uncompressed tar stream ".repeat(64);
        let layer = put(&cache, &plain, false);

        let compressed = cache.ensure_variant(&layer.digest).unwrap().unwrap();
        assert_eq!(
            cache
                .resolve_variant(&layer.digest, VariantKind::Compressed)
                .unwrap(),
            Some(compressed.clone())
        );
        assert_eq!(
            cache
                .resolve_variant(&compressed, VariantKind::Decompressed)
                .unwrap(),
            Some(layer.digest.clone())
        );

        let stored = fs::read(dir.path().join(compressed.as_str())).unwrap();
        assert_eq!(Compression::detect(&stored), Compression::Zstd);
        assert_eq!(zstd::decode_all(&stored[..]).unwrap(), plain);

        let resolved = cache.resolve_blob(&layer).unwrap().unwrap();
        assert_eq!(resolved.digest, compressed);
        assert_eq!(resolved.size, stored.len() as u64);

        // second call reuses the existing variant
        assert_eq!(
            cache.ensure_variant(&layer.digest).unwrap(),
            Some(compressed.clone())
        );

        // a compressed blob has nothing to compress
        assert_eq!(cache.ensure_variant(&compressed).unwrap(), None);
    }

    #[test]
    fn test_ensure_variant_decompress_gzip() {
        let dir = tempdir();
        let cache = cache(dir.path(), CompressionPolicy::Decompress);
        let plain = b"layer".repeat(100);
        let mut gz = flate2::write::GzEncoder::new(vec![], flate2::Compression::default());
        gz.write_all(&plain).unwrap();
        let layer = put(&cache, &gz.finish().unwrap(), false);

        let decompressed = cache.ensure_variant(&layer.digest).unwrap().unwrap();
        assert_eq!(
            decompressed,
            ContentDigest::compute(DigestAlgorithm::Sha256, &plain)
        );
        assert_eq!(
            cache.resolve_blob(&layer).unwrap().unwrap().variant,
            Some(VariantKind::Decompressed)
        );
    }

    #[test]
    fn test_ensure_variant_noop() {
        let dir = tempdir();
        let preserve = cache(dir.path(), CompressionPolicy::PreserveOriginal);
        let layer = put(&preserve, b"plain", false);
        assert_eq!(preserve.ensure_variant(&layer.digest).unwrap(), None);

        // not stored at all
        let compress = cache(dir.path(), CompressionPolicy::Compress);
        let absent = ContentDigest::compute(DigestAlgorithm::Sha256, b"absent");
        assert_eq!(compress.ensure_variant(&absent).unwrap(), None);
        assert_eq!(compress.ensure_variant(&ContentDigest::default()).unwrap(), None);
    }
}
