//! Variant links between differently-compressed copies of the same content.
//!
//! A variant link is a side file `<owner>.compressed` or `<owner>.decompressed` whose
//! content is the digest of the counterpart blob.  Links are advisory: the target may
//! have been cleared, or never fully written, so resolution always re-probes before
//! trusting one.

use std::{fs, io::Write, path::Path};

use log::{debug, trace};

use crate::{
    compression::CompressionPolicy,
    digest::ContentDigest,
    error::{CacheError, Result},
    layout::{variant_path, TEMP_PREFIX},
    probe::{probe_blob, BlobDescriptor},
    util::NotFoundFilter,
};

/// Which alternate form a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Compressed,
    Decompressed,
}

impl VariantKind {
    /// The link kind that leads back from the counterpart.
    pub fn inverse(self) -> Self {
        match self {
            VariantKind::Compressed => VariantKind::Decompressed,
            VariantKind::Decompressed => VariantKind::Compressed,
        }
    }
}

/// Outcome of a policy-aware lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBlob {
    /// The digest whose content should be served.
    pub digest: ContentDigest,
    /// Its stored size.
    pub size: u64,
    /// The kind of link followed, or `None` if the requested digest itself is served.
    pub variant: Option<VariantKind>,
}

/// Atomically records that the `kind` variant of `owner` is stored under `target`.
pub fn record_variant(
    directory: &Path,
    owner: &ContentDigest,
    kind: VariantKind,
    target: &ContentDigest,
) -> Result<()> {
    for digest in [owner, target] {
        if digest.is_empty() {
            return Err(CacheError::InvalidDigest {
                digest: digest.to_string(),
                reason: "cannot link a variant through an empty digest",
            });
        }
    }

    let path = variant_path(directory, owner, kind);
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(directory)
        .map_err(|e| CacheError::io("creating temporary file in", directory, e))?;
    file.write_all(target.as_str().as_bytes())
        .map_err(|e| CacheError::io("writing", file.path(), e))?;
    file.persist(&path)
        .map_err(|e| CacheError::io("renaming variant link into", &path, e.error))?;
    debug!("recorded {kind:?} variant of {owner}: {target}");
    Ok(())
}

/// Reads the `kind` link owned by `owner`, if there is one.
pub fn resolve_variant(
    directory: &Path,
    owner: &ContentDigest,
    kind: VariantKind,
) -> Result<Option<ContentDigest>> {
    if owner.is_empty() {
        return Ok(None);
    }

    let path = variant_path(directory, owner, kind);
    let Some(content) = fs::read_to_string(&path)
        .filter_not_found()
        .map_err(|e| CacheError::io("reading variant link", &path, e))?
    else {
        return Ok(None);
    };

    match ContentDigest::parse(content.trim()) {
        Ok(target) if !target.is_empty() => Ok(Some(target)),
        Ok(_) => Ok(None),
        Err(err) => Err(CacheError::InvalidVariantLink {
            path,
            source: Box::new(err),
        }),
    }
}

/// Finds the blob a reader should be served for `blob` under `policy`.
///
/// With a preferred variant, a link whose target is actually stored wins; otherwise
/// (no link, or an orphaned one) the requested digest itself is probed.
pub fn resolve_for_policy(
    directory: &Path,
    blob: &BlobDescriptor,
    policy: CompressionPolicy,
) -> Result<Option<ResolvedBlob>> {
    if let Some(kind) = policy.preferred_variant() {
        if let Some(target) = resolve_variant(directory, &blob.digest, kind)? {
            // the requested size describes the original, not the variant
            let candidate = BlobDescriptor::new(target.clone());
            if let Some(size) = probe_blob(directory, &candidate)? {
                trace!("{} resolved to {kind:?} variant {target}", blob.digest);
                return Ok(Some(ResolvedBlob {
                    digest: target,
                    size,
                    variant: Some(kind),
                }));
            }
            debug!("ignoring stale {kind:?} link {} -> {target}", blob.digest);
        }
    }

    Ok(probe_blob(directory, blob)?.map(|size| ResolvedBlob {
        digest: blob.digest.clone(),
        size,
        variant: None,
    }))
}
