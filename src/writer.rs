//! Atomic, verified writes into the cache directory.
//!
//! Bytes are streamed into a hidden temporary file next to their final location and
//! hashed on the way.  [`BlobWriter::commit`] checks the digest and renames the file into
//! place, so a concurrent reader in this or any other process sees either nothing or the
//! complete blob.  Dropping a writer without committing removes the temporary file.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::debug;
use tempfile::NamedTempFile;

use crate::{
    digest::{ContentDigest, DigestAlgorithm, DigestHasher},
    error::{CacheError, Result},
    layout::{blob_path, TEMP_PREFIX},
};

/// Destination of a blob being written.
#[derive(Debug)]
enum Expected {
    /// The content must hash to this digest.
    Digest(ContentDigest),
    /// The content is stored under whatever digest it hashes to.
    Computed,
}

/// Streams a blob into the cache.
#[derive(Debug)]
pub struct BlobWriter {
    directory: PathBuf,
    file: NamedTempFile,
    hasher: DigestHasher,
    expected: Expected,
    is_config: bool,
    written: u64,
}

impl BlobWriter {
    /// Start writing a blob that must hash to `digest`.
    pub fn create(directory: &Path, digest: &ContentDigest, is_config: bool) -> Result<Self> {
        let Some(algorithm) = digest.algorithm() else {
            return Err(CacheError::InvalidDigest {
                digest: digest.to_string(),
                reason: "cannot store a blob under an empty digest",
            });
        };
        Self::new(directory, algorithm, Expected::Digest(digest.clone()), is_config)
    }

    /// Start writing a layer blob whose digest isn't known yet.
    pub fn create_computed(directory: &Path, algorithm: DigestAlgorithm) -> Result<Self> {
        Self::new(directory, algorithm, Expected::Computed, false)
    }

    fn new(
        directory: &Path,
        algorithm: DigestAlgorithm,
        expected: Expected,
        is_config: bool,
    ) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(directory)
            .map_err(|e| CacheError::io("creating temporary file in", directory, e))?;
        Ok(Self {
            directory: directory.to_path_buf(),
            file,
            hasher: algorithm.hasher(),
            expected,
            is_config,
            written: 0,
        })
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Verifies the content and renames it into place, returning its digest and size.
    ///
    /// An existing entry under the same name is replaced atomically; by digest, it holds
    /// the same bytes.
    pub fn commit(mut self) -> Result<(ContentDigest, u64)> {
        self.file
            .flush()
            .map_err(|e| CacheError::io("flushing", self.file.path(), e))?;

        let actual = self.hasher.finish();
        let digest = match self.expected {
            Expected::Digest(expected) if expected != actual => {
                return Err(CacheError::DigestMismatch { expected, actual });
            }
            Expected::Digest(expected) => expected,
            Expected::Computed => actual,
        };

        let path = blob_path(&self.directory, &digest, self.is_config);
        self.file
            .persist(&path)
            .map_err(|e| CacheError::io("renaming blob into", &path, e.error))?;
        debug!("stored {} ({} bytes)", path.display(), self.written);
        Ok((digest, self.written))
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
