//! Reading images through the cache.
//!
//! [`CachedSource`] wraps the remote side's [`ImageSource`].  Blob reads are answered
//! from the cache directory when the blob is there; otherwise the remote stream is
//! copied into the cache as it is read and the cached copy is returned.  The layer list
//! offered for copying substitutes cached variants according to the compression policy.

use std::{io::Write, path::Path};

use anyhow::{Context, Result};
use log::{debug, trace};
use oci_spec::image::{Descriptor, ImageManifest};
use tokio::{io::AsyncReadExt, sync::mpsc};

use crate::{
    cache::BlobCache,
    compression::Compression,
    digest::ContentDigest,
    layout::blob_path,
    probe::BlobDescriptor,
    reference::{BlobStream, ImageReference, ImageSource},
    util::NotFoundFilter,
    variant::VariantKind,
    writer::BlobWriter,
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// An image source that reads through a [`BlobCache`].
pub struct CachedSource<R: ImageReference> {
    cache: BlobCache<R>,
    remote: R::Source,
}

impl<R: ImageReference> std::fmt::Debug for CachedSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSource")
            .field("directory", &self.cache.directory())
            .field("compression", &self.cache.compression())
            .finish_non_exhaustive()
    }
}

impl<R: ImageReference> CachedSource<R> {
    pub(crate) fn new(cache: BlobCache<R>, remote: R::Source) -> Self {
        Self { cache, remote }
    }

    pub fn cache(&self) -> &BlobCache<R> {
        &self.cache
    }

    /// The wrapped remote source.
    pub fn remote(&self) -> &R::Source {
        &self.remote
    }

    /// Copies the remote blob into the cache and returns the stored size.
    ///
    /// The file writes happen on a blocking thread fed through a channel, so the remote
    /// stream is read concurrently with the disk writes.
    async fn write_through(&self, blob: &BlobDescriptor, mut stream: BlobStream) -> Result<u64> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(4);
        let directory = self.cache.directory().to_path_buf();
        let target = blob.clone();
        let handle = tokio::task::spawn_blocking(move || -> Result<BlobWriter> {
            let mut writer = BlobWriter::create(&directory, &target.digest, target.is_config)?;
            while let Some(chunk) = rx.blocking_recv() {
                writer
                    .write_all(&chunk)
                    .with_context(|| format!("Caching blob {}", target.digest))?;
            }
            Ok(writer)
        });

        let copied = send_chunks(&mut stream, &tx, &blob.digest).await;
        drop(tx);

        // a failed writer only ends the stream early; report the stream's error first
        let writer = handle.await?;
        copied?;
        let writer = writer?;

        if let Some(expected) = blob.size {
            anyhow::ensure!(
                writer.written() == expected,
                "Remote blob {} is {} bytes, expected {expected}",
                blob.digest,
                writer.written()
            );
        }

        let cache = self.cache.clone();
        let is_config = blob.is_config;
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let (digest, size) = writer.commit()?;
            if !is_config {
                cache.ensure_variant_or_warn(&digest);
            }
            Ok(size)
        })
        .await?
    }
}

/// Forwards `stream` to the blob writer until EOF or until the writer goes away.
async fn send_chunks(
    stream: &mut BlobStream,
    tx: &mpsc::Sender<Vec<u8>>,
    digest: &ContentDigest,
) -> Result<()> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = stream
            .read(&mut buffer)
            .await
            .with_context(|| format!("Reading remote blob {digest}"))?;
        if n == 0 {
            return Ok(());
        }
        // If send fails, the writer task has already failed
        if tx.send(buffer[..n].to_vec()).await.is_err() {
            return Ok(());
        }
    }
}

/// Opens whichever stored form of `blob` exists with the expected size.
async fn open_cached(
    directory: &Path,
    blob: &BlobDescriptor,
) -> std::io::Result<Option<(tokio::fs::File, u64)>> {
    if blob.digest.is_empty() {
        return Ok(None);
    }
    for is_config in [false, true] {
        let path = blob_path(directory, &blob.digest, is_config);
        let Some(file) = tokio::fs::File::open(&path).await.filter_not_found()? else {
            continue;
        };
        let size = file.metadata().await?.len();
        if blob.size.is_none_or(|expected| expected == size) {
            return Ok(Some((file, size)));
        }
        trace!("{} has size {size}, not {:?}", path.display(), blob.size);
    }
    Ok(None)
}

impl<R: ImageReference> ImageSource for CachedSource<R> {
    async fn get_manifest(&self) -> Result<Vec<u8>> {
        self.remote.get_manifest().await
    }

    async fn get_blob(&self, blob: &BlobDescriptor) -> Result<(BlobStream, u64)> {
        let directory = self.cache.directory();
        if let Some((file, size)) = open_cached(directory, blob).await? {
            debug!("cache hit for {}", blob.digest);
            let stream: BlobStream = Box::new(file);
            return Ok((stream, size));
        }

        let (stream, size) = self.remote.get_blob(blob).await?;
        if blob.digest.is_empty() {
            // nothing to file it under
            return Ok((stream, size));
        }

        debug!("cache miss for {}, fetching", blob.digest);
        let stored = self.write_through(blob, stream).await?;
        let (file, _) = open_cached(directory, blob)
            .await?
            .with_context(|| format!("Blob {} vanished from the cache", blob.digest))?;
        let stream: BlobStream = Box::new(file);
        Ok((stream, stored))
    }

    fn layer_infos_for_copy(&self, manifest: &ImageManifest) -> Result<Vec<Descriptor>> {
        let layers = manifest.layers();
        if self.cache.compression().preferred_variant().is_none() {
            return Ok(layers.clone());
        }

        layers
            .iter()
            .map(|layer| -> Result<Descriptor> {
                // a digest we can't parse can't have been cached
                let Ok(blob) = BlobDescriptor::try_from(layer) else {
                    return Ok(layer.clone());
                };
                let Some(resolved) = self.cache.resolve_blob(&blob)? else {
                    return Ok(layer.clone());
                };
                let Some(kind) = resolved.variant else {
                    return Ok(layer.clone());
                };

                let format = match kind {
                    VariantKind::Compressed => Compression::Zstd,
                    VariantKind::Decompressed => Compression::None,
                };
                trace!("substituting {} for {}", resolved.digest, blob.digest);
                let mut substitute = layer.clone();
                substitute
                    .set_digest(resolved.digest.as_str().parse()?)
                    .set_size(resolved.size)
                    .set_media_type(format.layer_media_type());
                Ok(substitute)
            })
            .collect()
    }
}
