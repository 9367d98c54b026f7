//! A write-through, content-addressed disk cache for container image blobs.
//!
//! [`BlobCache`] sits between a consumer and an image reference.  Blobs that pass through
//! it are stored in a flat directory under names derived from their digests, so later
//! reads can be served from disk.  Each layer may also be linked to a differently
//! compressed copy of the same content, and a [`CompressionPolicy`] decides which copy
//! readers prefer.
//!
//! Everything that isn't caching (naming, signature policy identity, deletion, opening
//! an image) is forwarded to the wrapped [`ImageReference`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use blobcache::{BlobCache, BlobDescriptor, CompressionPolicy, ContentDigest};
//! # fn example<R>(remote: Arc<R>) -> blobcache::Result<()> {
//! let cache = BlobCache::new(remote, "/var/cache/blobs", CompressionPolicy::Compress)?;
//! let digest: ContentDigest =
//!     "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".parse()?;
//! if let Some(size) = cache.has_blob(&BlobDescriptor::new(digest))? {
//!     println!("cached, {size} bytes");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod compression;
pub mod config;
pub mod digest;
pub mod error;
pub mod layout;
pub mod probe;
pub mod reference;
pub mod source;
pub mod variant;
pub mod writer;

mod util;


pub use cache::BlobCache;
pub use compression::{Compression, CompressionPolicy};
pub use config::CacheOptions;
pub use digest::{ContentDigest, DigestAlgorithm};
pub use error::{CacheError, Result};
pub use probe::BlobDescriptor;
pub use reference::{ImageHandle, ImageReference, ImageSource, SystemContext};
pub use source::CachedSource;
pub use variant::{ResolvedBlob, VariantKind};
pub use writer::BlobWriter;

// A cache must be usable wherever the reference it wraps is.
#[allow(dead_code)]
const _: () = {
    fn assert_reference<T: ImageReference>() {}
    fn assert_source<T: ImageSource>() {}

    fn assert_cache<R: ImageReference>() {
        assert_reference::<BlobCache<R>>();
        assert_source::<CachedSource<R>>();
    }
};
