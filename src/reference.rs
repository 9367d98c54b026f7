//! The capability set of an image reference, and the generic image-opening helper.
//!
//! These traits are the seam between the cache and whatever actually talks to a
//! registry.  The cache implements [`ImageReference`] itself by forwarding to the
//! reference it wraps, so it can be used anywhere the wrapped reference could.
//!
//! Async operations return `impl Future + Send`; dropping the future cancels them, to
//! the extent the remote implementation supports it.

use std::{future::Future, path::PathBuf};

use anyhow::{Context, Result};
use fn_error_context::context;
use oci_spec::image::{Descriptor, ImageManifest};
use tokio::io::AsyncRead;

use crate::probe::BlobDescriptor;

/// A stream of blob content.
pub type BlobStream = Box<dyn AsyncRead + Send + Unpin>;

/// Host configuration handed through to the remote side untouched.
#[derive(Debug, Clone, Default)]
pub struct SystemContext {
    /// Prefix applied to absolute paths the remote side reads configuration from.
    pub root_for_implicit_absolute_paths: Option<PathBuf>,
    /// Registry credentials file.
    pub auth_file_path: Option<PathBuf>,
    /// Skip TLS verification when talking to registries.
    pub insecure_skip_tls_verify: bool,
}

/// Something that names an image and can open it.
pub trait ImageReference: Send + Sync + 'static {
    type Source: ImageSource;

    /// Name of the transport, e.g. `docker`.
    fn transport(&self) -> &str;

    /// The reference as a string within its transport, e.g. `//quay.io/foo:latest`.
    fn string_within_transport(&self) -> String;

    /// The canonical registry name, if the reference has one.
    fn docker_reference(&self) -> Option<String>;

    /// Identity used when looking up signature policy for this reference.
    fn policy_configuration_identity(&self) -> String;

    /// Progressively less specific namespaces for signature policy lookup.
    fn policy_configuration_namespaces(&self) -> Vec<String>;

    fn delete_image(&self, sys: &SystemContext) -> impl Future<Output = Result<()>> + Send;

    fn new_image_source(
        &self,
        sys: &SystemContext,
    ) -> impl Future<Output = Result<Self::Source>> + Send;
}

/// Read access to an opened image.
pub trait ImageSource: Send + Sync {
    /// The raw manifest bytes.
    fn get_manifest(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// A blob's content and its size.
    fn get_blob(
        &self,
        blob: &BlobDescriptor,
    ) -> impl Future<Output = Result<(BlobStream, u64)>> + Send;

    /// The layers a copy should fetch; by default those listed in the manifest.
    fn layer_infos_for_copy(&self, manifest: &ImageManifest) -> Result<Vec<Descriptor>> {
        Ok(manifest.layers().clone())
    }
}

/// An opened image: its source and parsed manifest.
#[derive(Debug)]
pub struct ImageHandle<S: ImageSource> {
    source: S,
    raw_manifest: Vec<u8>,
    manifest: ImageManifest,
}

impl<S: ImageSource> ImageHandle<S> {
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn raw_manifest(&self) -> &[u8] {
        &self.raw_manifest
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    /// The config blob as described by the manifest.
    pub fn config_info(&self) -> Result<BlobDescriptor> {
        Ok(BlobDescriptor::try_from(self.manifest.config())?)
    }

    /// The layers a copy of this image should fetch.
    pub fn layer_infos_for_copy(&self) -> Result<Vec<Descriptor>> {
        self.source.layer_infos_for_copy(&self.manifest)
    }
}

/// Opens `reference` and parses its manifest.
#[context("Opening image {}:{}", reference.transport(), reference.string_within_transport())]
pub async fn open_image_from_reference<R: ImageReference>(
    reference: &R,
    sys: &SystemContext,
) -> Result<ImageHandle<R::Source>> {
    let source = reference.new_image_source(sys).await?;
    let raw_manifest = source.get_manifest().await.context("Fetching manifest")?;
    let manifest = ImageManifest::from_reader(&raw_manifest[..]).context("Parsing manifest")?;
    Ok(ImageHandle {
        source,
        raw_manifest,
        manifest,
    })
}
