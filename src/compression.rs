//! Compression policy and the codecs used to produce blob variants.

use core::{fmt, str::FromStr};
use std::io::{self, Read};

use flate2::read::GzDecoder;
use oci_spec::image::MediaType;
use serde::Deserialize;

use crate::{
    error::{CacheError, Result},
    variant::VariantKind,
};

/// zstd level used when producing compressed variants.
const ZSTD_LEVEL: i32 = 3;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// Which representation of a layer readers of the cache should prefer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionPolicy {
    /// Serve exactly the requested digest.
    #[default]
    PreserveOriginal,
    /// Prefer a decompressed variant when one is cached.
    Decompress,
    /// Prefer a compressed variant when one is cached.
    Compress,
}

impl CompressionPolicy {
    /// The variant link a reader should follow, if any.
    pub fn preferred_variant(self) -> Option<VariantKind> {
        match self {
            CompressionPolicy::PreserveOriginal => None,
            CompressionPolicy::Decompress => Some(VariantKind::Decompressed),
            CompressionPolicy::Compress => Some(VariantKind::Compressed),
        }
    }
}

impl fmt::Display for CompressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionPolicy::PreserveOriginal => "preserve-original",
            CompressionPolicy::Decompress => "decompress",
            CompressionPolicy::Compress => "compress",
        })
    }
}

impl FromStr for CompressionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preserve-original" => Ok(CompressionPolicy::PreserveOriginal),
            "decompress" => Ok(CompressionPolicy::Decompress),
            "compress" => Ok(CompressionPolicy::Compress),
            other => Err(CacheError::Configuration(format!(
                "unhandled compression policy {other:?}"
            ))),
        }
    }
}

/// Raw values as used by containers/image's `LayerCompression`.
impl TryFrom<u32> for CompressionPolicy {
    type Error = CacheError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionPolicy::PreserveOriginal),
            1 => Ok(CompressionPolicy::Decompress),
            2 => Ok(CompressionPolicy::Compress),
            other => Err(CacheError::Configuration(format!(
                "unhandled compression policy value {other}"
            ))),
        }
    }
}

/// Compression format of a stored blob, as sniffed from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn detect(header: &[u8]) -> Self {
        if header.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if header.starts_with(ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// Layer media type for content in this format.
    pub fn layer_media_type(self) -> MediaType {
        match self {
            Compression::None => MediaType::ImageLayer,
            Compression::Gzip => MediaType::ImageLayerGzip,
            Compression::Zstd => MediaType::ImageLayerZstd,
        }
    }
}

/// Wraps `reader` so that it yields the `kind` variant of content stored in `format`.
///
/// Returns `None` when the content is already in the requested form.
pub(crate) fn variant_reader<'a>(
    format: Compression,
    kind: VariantKind,
    reader: impl Read + 'a,
) -> io::Result<Option<Box<dyn Read + 'a>>> {
    let reader: Box<dyn Read + 'a> = match (kind, format) {
        (VariantKind::Compressed, Compression::None) => {
            Box::new(zstd::stream::read::Encoder::new(reader, ZSTD_LEVEL)?)
        }
        (VariantKind::Decompressed, Compression::Gzip) => Box::new(GzDecoder::new(reader)),
        (VariantKind::Decompressed, Compression::Zstd) => {
            Box::new(zstd::stream::read::Decoder::new(reader)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(reader))
}
