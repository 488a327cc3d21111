//! # Registry Access
//!
//! Everything that talks to an OCI registry goes through the [`Registry`]
//! trait, so bundle decoding and base-image loading work the same against a
//! real registry ([`RemoteRegistry`]) and an in-process one
//! ([`MemoryRegistry`]).
//!
//! ## Reference Validation
//!
//! All references are validated before use:
//! - Length check against `MAX_IMAGE_REF_LEN` (512 bytes)
//! - Character allowlist (alphanumeric + `/:.-_@`)
//! - Format parsing via `oci-distribution`
//!
//! ## Authentication
//!
//! | Keychain           | Credentials                    |
//! |--------------------|--------------------------------|
//! | [`Anonymous`]      | none                           |
//! | [`StaticKeychain`] | basic auth, per registry host  |
//!
//! ## Failure Model
//!
//! One attempt per request. Timeouts, retries and backoff belong to the
//! caller (or to the HTTP stack underneath `oci-distribution`).

use crate::constants::{IMAGE_REF_VALID_CHARS, MAX_IMAGE_REF_LEN};
use crate::error::{Error, Result};
use crate::image::{parse_manifest, ImageIndex, IndexChild};
use crate::storage::BlobStore;
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciDescriptor, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// Validates and parses an image reference.
///
/// # Errors
///
/// [`Error::InvalidImageReference`] if the reference is too long, contains
/// characters outside the allowlist, or does not parse.
pub fn parse_reference(image_ref: &str) -> Result<Reference> {
    if image_ref.len() > MAX_IMAGE_REF_LEN {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: format!("exceeds {} bytes", MAX_IMAGE_REF_LEN),
        });
    }

    if image_ref.is_empty() || !image_ref.chars().all(|c| IMAGE_REF_VALID_CHARS.contains(c)) {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: "contains invalid characters".to_string(),
        });
    }

    image_ref
        .parse()
        .map_err(|e| Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: format!("{}", e),
        })
}

/// Read access to an OCI registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetches the manifest `reference` points at, with its digest.
    async fn manifest(&self, reference: &Reference) -> Result<(OciManifest, String)>;

    /// Fetches a blob from the repository of `reference`.
    async fn blob(&self, reference: &Reference, descriptor: &OciDescriptor) -> Result<Vec<u8>>;
}

// =============================================================================
// Credentials
// =============================================================================

/// Resolves credentials for a registry host.
pub trait Keychain: Send + Sync {
    /// Returns the credentials to use for `registry` (e.g. `ghcr.io`).
    fn resolve(&self, registry: &str) -> RegistryAuth;
}

/// Keychain that never sends credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Keychain for Anonymous {
    fn resolve(&self, _registry: &str) -> RegistryAuth {
        RegistryAuth::Anonymous
    }
}

/// Fixed basic-auth credentials per registry host.
///
/// Hosts without an entry are accessed anonymously.
#[derive(Debug, Clone, Default)]
pub struct StaticKeychain {
    credentials: HashMap<String, (String, String)>,
}

impl StaticKeychain {
    /// Creates an empty keychain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds basic-auth credentials for `registry`.
    pub fn with_basic(mut self, registry: &str, username: &str, password: &str) -> Self {
        self.credentials.insert(
            registry.to_string(),
            (username.to_string(), password.to_string()),
        );
        self
    }
}

impl Keychain for StaticKeychain {
    fn resolve(&self, registry: &str) -> RegistryAuth {
        match self.credentials.get(registry) {
            Some((user, pass)) => RegistryAuth::Basic(user.clone(), pass.clone()),
            None => RegistryAuth::Anonymous,
        }
    }
}

// =============================================================================
// Remote Registry
// =============================================================================

/// Connection settings for [`RemoteRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Talk plain HTTP instead of HTTPS (local test registries only).
    pub insecure: bool,
}

/// Registry client backed by `oci-distribution`.
///
/// Blob requests reuse the token obtained by the preceding manifest
/// request for the same repository.
pub struct RemoteRegistry {
    client: Client,
    keychain: Box<dyn Keychain>,
}

impl RemoteRegistry {
    /// Creates an HTTPS client with anonymous auth.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), Anonymous)
    }

    /// Creates a client with explicit settings and credentials.
    pub fn with_config(config: RegistryConfig, keychain: impl Keychain + 'static) -> Self {
        let protocol = if config.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };

        Self {
            client: Client::new(ClientConfig {
                protocol,
                ..Default::default()
            }),
            keychain: Box::new(keychain),
        }
    }
}

impl Default for RemoteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for RemoteRegistry {
    async fn manifest(&self, reference: &Reference) -> Result<(OciManifest, String)> {
        debug!("Fetching manifest {}", reference);

        let auth = self.keychain.resolve(reference.registry());
        self.client
            .pull_manifest(reference, &auth)
            .await
            .map_err(|e| Error::ManifestFetchFailed {
                reference: reference.to_string(),
                reason: e.to_string(),
            })
    }

    async fn blob(&self, reference: &Reference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        debug!(
            "Fetching blob {} ({} bytes)",
            descriptor.digest, descriptor.size
        );

        let mut data = Vec::new();
        self.client
            .pull_blob(reference, descriptor, &mut data)
            .await
            .map_err(|e| Error::BlobFetchFailed {
                digest: descriptor.digest.clone(),
                reason: e.to_string(),
            })?;

        Ok(data)
    }
}

// =============================================================================
// In-Memory Registry
// =============================================================================

/// In-process registry over a [`BlobStore`].
///
/// Manifests and blobs share one content-addressed store; tags map
/// `registry/repository:tag` to a manifest digest. Repositories are not
/// isolated from each other.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    store: BlobStore,
    tags: RwLock<HashMap<String, String>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry over an existing store (e.g. one pre-seeded with
    /// base-image layers).
    pub fn with_store(store: BlobStore) -> Self {
        Self {
            store,
            tags: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Uploads `index` with every manifest, config and layer below it, and
    /// points `reference` at it. Returns the index digest.
    ///
    /// # Errors
    ///
    /// [`Error::LayerUnavailable`] if a remote layer is not already in the
    /// store.
    pub fn publish(&self, reference: &str, index: &ImageIndex) -> Result<String> {
        let reference = parse_reference(reference)?;
        let digest = self.put_index(index)?;

        if let Some(pinned) = reference.digest() {
            if pinned != digest {
                return Err(Error::DigestMismatch {
                    expected: pinned.to_string(),
                    actual: digest,
                });
            }
        } else {
            self.tags
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(tag_key(&reference), digest.clone());
        }

        info!("Published {} as {}", reference, digest);
        Ok(digest)
    }

    fn put_index(&self, index: &ImageIndex) -> Result<String> {
        for entry in index.entries() {
            match &entry.child {
                IndexChild::Image(image) => {
                    self.store.put(&image.raw_config()?)?;
                    for layer in image.layers() {
                        if layer.is_remote() {
                            let digest = layer.digest()?;
                            if !self.store.has_blob(&digest) {
                                return Err(Error::LayerUnavailable { digest });
                            }
                        } else {
                            self.store.put(&layer.compressed()?)?;
                        }
                    }
                    self.store.put(&image.raw_manifest()?)?;
                }
                IndexChild::Index(nested) => {
                    self.put_index(nested)?;
                }
            }
        }

        self.store.put(&index.raw_manifest()?)
    }
}

fn tag_key(reference: &Reference) -> String {
    format!(
        "{}/{}:{}",
        reference.registry(),
        reference.repository(),
        reference.tag().unwrap_or("latest")
    )
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn manifest(&self, reference: &Reference) -> Result<(OciManifest, String)> {
        let digest = match reference.digest() {
            Some(digest) => digest.to_string(),
            None => self
                .tags
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&tag_key(reference))
                .cloned()
                .ok_or_else(|| Error::ManifestFetchFailed {
                    reference: reference.to_string(),
                    reason: "unknown tag".to_string(),
                })?,
        };

        let raw = self
            .store
            .get_blob(&digest)
            .map_err(|e| Error::ManifestFetchFailed {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;

        Ok((parse_manifest(&raw)?, digest))
    }

    async fn blob(&self, _reference: &Reference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        Ok(self.store.get_blob(&descriptor.digest)?.to_vec())
    }
}
