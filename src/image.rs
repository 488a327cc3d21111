//! # OCI Image Model
//!
//! In-memory images and image indexes, serialized to the OCI documents of
//! `oci-distribution` (manifests, indexes, descriptors) and `oci-spec`
//! (image configs).
//!
//! ## Structure
//!
//! ```text
//! ImageIndex ─┬─ IndexEntry { platform, annotations } ── Image ─┬─ ImageConfiguration
//!             │                                                 └─ Vec<Layer>
//!             └─ IndexEntry { annotations } ── ImageIndex (nested)
//! ```
//!
//! Digests are never stored: they are derived from the serialized form on
//! demand, so an image can be mutated freely until it is published.
//!
//! ## Canonical Encoding
//!
//! Annotations and labels are hash maps in the wire types. Every document
//! is written with sorted object keys so equal content always hashes to
//! the same digest.

use crate::constants::{
    OCI_IMAGE_CONFIG_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_SCHEMA_VERSION, ROOTFS_TYPE,
};
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::platform::Arch;
use crate::registry::{parse_reference, Registry};
use crate::storage::sha256_digest;
use oci_distribution::Reference;
use oci_spec::image::{Arch as OciArch, Os};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

pub use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageIndex, OciImageManifest, OciManifest, Platform,
};
pub use oci_spec::image::{Config, History, ImageConfiguration};

// =============================================================================
// Wire Documents
// =============================================================================

/// Serializes `value` as JSON with every object's keys sorted.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(value)?;
    value.sort_all_objects();
    Ok(serde_json::to_vec(&value)?)
}

/// Describes `blob` stored under `media_type`.
pub fn blob_descriptor(media_type: &str, blob: &[u8]) -> OciDescriptor {
    OciDescriptor {
        media_type: media_type.to_string(),
        digest: sha256_digest(blob),
        size: blob.len() as i64,
        urls: None,
        annotations: None,
    }
}

/// Parses a manifest, telling images and indexes apart by their shape.
pub fn parse_manifest(data: &[u8]) -> Result<OciManifest> {
    serde_json::from_slice(data).map_err(|e| {
        Error::Serialization(format!(
            "document is neither an image manifest nor an index: {}",
            e
        ))
    })
}

/// Returns a short name of the manifest kind for error messages.
pub fn manifest_kind(manifest: &OciManifest) -> &'static str {
    match manifest {
        OciManifest::Image(_) => "image manifest",
        OciManifest::ImageIndex(_) => "image index",
    }
}

/// Returns an annotation of an index entry.
pub fn entry_annotation<'a>(entry: &'a ImageIndexEntry, key: &str) -> Option<&'a str> {
    entry.annotations.as_ref()?.get(key).map(String::as_str)
}

fn annotation_map(annotations: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    (!annotations.is_empty()).then(|| annotations.clone().into_iter().collect())
}

fn sorted(annotations: Option<HashMap<String, String>>) -> BTreeMap<String, String> {
    annotations
        .map(|a| a.into_iter().collect())
        .unwrap_or_default()
}

/// Image config naming only a platform and the `layers` rootfs type.
fn blank_config(architecture: &str, os: &str, variant: Option<String>) -> ImageConfiguration {
    let mut rootfs = ImageConfiguration::default().rootfs().clone();
    rootfs.set_typ(ROOTFS_TYPE.to_string());
    rootfs.set_diff_ids(Vec::new());

    let mut config = ImageConfiguration::default();
    config
        .set_architecture(OciArch::from(architecture))
        .set_os(Os::from(os))
        .set_variant(variant)
        .set_rootfs(rootfs);
    config
}

// =============================================================================
// Image
// =============================================================================

/// A single-platform image: config plus ordered layers (base first).
#[derive(Debug, Clone)]
pub struct Image {
    config: ImageConfiguration,
    layers: Vec<Layer>,
    annotations: BTreeMap<String, String>,
}

impl Image {
    /// Creates an image with no layers and a config naming no platform.
    pub fn empty() -> Self {
        Self::from_parts(blank_config("", "", None), Vec::new())
    }

    /// Creates an empty image whose config names `platform`.
    pub fn for_platform(platform: &Platform) -> Self {
        Self::from_parts(
            blank_config(
                &platform.architecture,
                &platform.os,
                platform.variant.clone(),
            ),
            Vec::new(),
        )
    }

    /// Assembles an image from a config and its layers.
    pub fn from_parts(config: ImageConfiguration, layers: Vec<Layer>) -> Self {
        Self {
            config,
            layers,
            annotations: BTreeMap::new(),
        }
    }

    /// Returns the image config.
    pub fn config_file(&self) -> &ImageConfiguration {
        &self.config
    }

    /// Returns the execution parameters, if the config carries any.
    pub fn config(&self) -> Option<&Config> {
        self.config.config().as_ref()
    }

    /// Edits the execution parameters, creating them if absent.
    pub fn update_config(&mut self, edit: impl FnOnce(&mut Config)) {
        let mut config = self.config.config().clone().unwrap_or_default();
        edit(&mut config);
        self.config.set_config(Some(config));
    }

    /// Returns the layers, base first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Sets a manifest-level annotation.
    pub fn annotate(&mut self, key: &str, value: &str) {
        self.annotations.insert(key.to_string(), value.to_string());
    }

    /// Appends a layer on top, recording its diff ID and a history entry.
    pub fn append_layer(&mut self, layer: Layer, created_by: &str) -> Result<()> {
        let mut rootfs = self.config.rootfs().clone();
        let mut diff_ids = rootfs.diff_ids().clone();
        diff_ids.push(layer.diff_id()?);
        rootfs.set_diff_ids(diff_ids);

        let mut entry = History::default();
        entry.set_created_by(Some(created_by.to_string()));
        let mut history = self.config.history().clone();
        history.push(entry);

        self.config.set_rootfs(rootfs).set_history(history);
        self.layers.push(layer);
        Ok(())
    }

    /// Serializes the config blob.
    pub fn raw_config(&self) -> Result<Vec<u8>> {
        canonical_json(&self.config)
    }

    /// Builds the manifest document.
    pub fn manifest(&self) -> Result<OciImageManifest> {
        let config = self.raw_config()?;
        let layers = self
            .layers
            .iter()
            .map(Layer::descriptor)
            .collect::<Result<Vec<_>>>()?;

        Ok(OciImageManifest {
            schema_version: OCI_SCHEMA_VERSION,
            media_type: Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            config: blob_descriptor(OCI_IMAGE_CONFIG_MEDIA_TYPE, &config),
            layers,
            artifact_type: None,
            annotations: annotation_map(&self.annotations),
        })
    }

    /// Serializes the manifest document.
    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        canonical_json(&self.manifest()?)
    }

    /// Returns the manifest digest.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.raw_manifest()?))
    }

    /// Returns a descriptor pointing at this image's manifest.
    pub fn descriptor(&self) -> Result<OciDescriptor> {
        Ok(blob_descriptor(
            OCI_IMAGE_MANIFEST_MEDIA_TYPE,
            &self.raw_manifest()?,
        ))
    }
}

// =============================================================================
// Image Index
// =============================================================================

/// What an index entry points at.
#[derive(Debug, Clone)]
pub enum IndexChild {
    Image(Image),
    Index(ImageIndex),
}

/// One entry of an [`ImageIndex`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub child: IndexChild,
    pub platform: Option<Platform>,
    pub annotations: BTreeMap<String, String>,
}

impl IndexEntry {
    /// Entry for an image, optionally bound to a platform.
    pub fn image(image: Image, platform: Option<Platform>) -> Self {
        Self {
            child: IndexChild::Image(image),
            platform,
            annotations: BTreeMap::new(),
        }
    }

    /// Entry for a nested index.
    pub fn index(index: ImageIndex) -> Self {
        Self {
            child: IndexChild::Index(index),
            platform: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Adds an annotation to the entry's descriptor.
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns the descriptor the parent index records for this entry.
    pub fn descriptor(&self) -> Result<ImageIndexEntry> {
        let desc = match &self.child {
            IndexChild::Image(image) => image.descriptor()?,
            IndexChild::Index(index) => index.descriptor()?,
        };
        Ok(ImageIndexEntry {
            media_type: desc.media_type,
            digest: desc.digest,
            size: desc.size,
            platform: self.platform.clone(),
            annotations: annotation_map(&self.annotations),
        })
    }
}

/// A multi-platform image index.
#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    entries: Vec<IndexEntry>,
}

impl ImageIndex {
    /// Creates an index with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Returns the entries in order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the image built for `arch`, with the platform it is listed under.
    pub fn image_for(&self, arch: &Arch) -> Option<(&Image, &Platform)> {
        self.entries.iter().find_map(|entry| {
            match (&entry.child, &entry.platform) {
                (IndexChild::Image(image), Some(platform))
                    if Arch::from_platform(platform) == *arch =>
                {
                    Some((image, platform))
                }
                _ => None,
            }
        })
    }

    /// Returns the architectures of all platform-bound entries, in order.
    pub fn architectures(&self) -> Vec<Arch> {
        self.entries
            .iter()
            .filter_map(|e| e.platform.as_ref().map(Arch::from_platform))
            .collect()
    }

    /// Builds the index manifest document.
    pub fn manifest(&self) -> Result<OciImageIndex> {
        let manifests = self
            .entries
            .iter()
            .map(IndexEntry::descriptor)
            .collect::<Result<Vec<_>>>()?;

        Ok(OciImageIndex {
            schema_version: OCI_SCHEMA_VERSION,
            media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
            manifests,
            annotations: None,
        })
    }

    /// Serializes the index manifest document.
    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        canonical_json(&self.manifest()?)
    }

    /// Returns the index digest.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.raw_manifest()?))
    }

    /// Returns a descriptor pointing at this index.
    pub fn descriptor(&self) -> Result<OciDescriptor> {
        Ok(blob_descriptor(
            OCI_IMAGE_INDEX_MEDIA_TYPE,
            &self.raw_manifest()?,
        ))
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Loads the image index at `reference` for use as a compose base.
///
/// Configs are fetched and parsed; layers stay in the registry and are
/// represented by their descriptors. Nested indexes are skipped.
///
/// # Errors
///
/// - [`Error::NotAnIndex`] if `reference` resolves to an image manifest
/// - registry errors for the index, any child manifest, or any config
pub async fn load_index<R>(registry: &R, reference: &str) -> Result<ImageIndex>
where
    R: Registry + ?Sized,
{
    let reference = parse_reference(reference)?;
    let (manifest, digest) = registry.manifest(&reference).await?;

    let manifest = match manifest {
        OciManifest::ImageIndex(index) => index,
        other => {
            return Err(Error::NotAnIndex {
                reference: reference.to_string(),
                found: manifest_kind(&other).to_string(),
            });
        }
    };

    info!(
        "Loading base index {} ({} entries)",
        digest,
        manifest.manifests.len()
    );

    let mut index = ImageIndex::empty();

    for entry in manifest.manifests {
        let child_ref = Reference::with_digest(
            reference.registry().to_string(),
            reference.repository().to_string(),
            entry.digest.clone(),
        );

        let image_manifest = match registry.manifest(&child_ref).await? {
            (OciManifest::Image(image), _) => image,
            (OciManifest::ImageIndex(_), _) => {
                debug!("Skipping nested index {}", entry.digest);
                continue;
            }
        };

        let raw_config = registry.blob(&child_ref, &image_manifest.config).await?;
        let config: ImageConfiguration = serde_json::from_slice(&raw_config)?;

        let layers = image_manifest
            .layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| {
                let diff_id = config.rootfs().diff_ids().get(i).cloned();
                Layer::remote(layer, diff_id)
            })
            .collect();

        let mut image = Image::from_parts(config, layers);
        for (key, value) in sorted(image_manifest.annotations) {
            image.annotate(&key, &value);
        }

        debug!(
            "Loaded {} ({} layers)",
            entry.digest,
            image.layers().len()
        );

        index.push(IndexEntry {
            child: IndexChild::Image(image),
            platform: entry.platform,
            annotations: sorted(entry.annotations),
        });
    }

    Ok(index)
}
