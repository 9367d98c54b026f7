//! Existence probing.
//!
//! A probe answers "is this blob in the cache, and how big is it?" by looking at both
//! filename forms a digest may be stored under.  Absence is an ordinary answer; any
//! other stat failure is an error, because a broken cache mount must not look like a
//! cold cache and silently trigger a redownload.

use std::path::Path;

use log::trace;
use oci_spec::image::{Descriptor, MediaType};

use crate::{
    digest::ContentDigest,
    error::{CacheError, Result},
    layout::blob_path,
    util::file_size,
};

/// Identifies a logical blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub digest: ContentDigest,
    /// Expected size in bytes, if known.
    pub size: Option<u64>,
    pub is_config: bool,
}

impl BlobDescriptor {
    /// A layer blob of unknown size.
    pub fn new(digest: ContentDigest) -> Self {
        Self {
            digest,
            size: None,
            is_config: false,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn config(mut self) -> Self {
        self.is_config = true;
        self
    }
}

impl TryFrom<&Descriptor> for BlobDescriptor {
    type Error = CacheError;

    fn try_from(descriptor: &Descriptor) -> Result<Self> {
        Ok(Self {
            digest: ContentDigest::try_from(descriptor.digest())?,
            size: Some(descriptor.size()),
            is_config: *descriptor.media_type() == MediaType::ImageConfig,
        })
    }
}

/// Looks for `blob` under `directory`, returning the stored size if found.
///
/// The layer form is tried before the config form, regardless of `blob.is_config`.  A
/// file whose size disagrees with a known `blob.size` doesn't count as a match.
pub fn probe_blob(directory: &Path, blob: &BlobDescriptor) -> Result<Option<u64>> {
    if blob.digest.is_empty() {
        return Ok(None);
    }

    for is_config in [false, true] {
        let path = blob_path(directory, &blob.digest, is_config);
        let size = file_size(&path).map_err(|e| CacheError::io("checking size of", &path, e))?;
        trace!("probe {}: {size:?}", path.display());
        match size {
            Some(size) if blob.size.is_none_or(|expected| expected == size) => {
                return Ok(Some(size));
            }
            _ => {}
        }
    }

    Ok(None)
}
