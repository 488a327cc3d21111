//! Error types for the bundle engine.

use std::path::PathBuf;

/// Result type alias for bundle engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing, encoding, pulling, or scheduling
/// a bundle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Input Validation Errors
    // =========================================================================
    /// Mount descriptor is not of the form `bucket[/onlydir]:/mount`.
    #[error("gcsfuse mount spec should be in the form 'bucket[/onlydir]:/mount', got: {0:?}")]
    InvalidMountSpec(String),

    /// Failed to parse image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// CPU request could not be parsed as a decimal number.
    #[error("parsing cpu {value:?}: {reason}")]
    InvalidCpu { value: String, reason: String },

    /// Memory request is not a valid resource quantity.
    #[error("parsing memory {value:?}: {reason}")]
    InvalidMemory { value: String, reason: String },

    /// Digest string is not `algorithm:hex`.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    // =========================================================================
    // Structural Errors
    // =========================================================================
    /// A requested architecture has no entrypoint configured.
    #[error("unexpected arch {arch:?} for entrypoints: {available:?}")]
    MissingEntrypoint { arch: String, available: Vec<String> },

    /// File tree contains something other than directories and regular files.
    #[error("tar: cannot add non-regular file: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    /// Writing a layer archive failed.
    #[error("failed to archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    /// Layer content is not held locally (remote base layer).
    #[error("layer {digest} is not available locally")]
    LayerUnavailable { digest: String },

    /// Bundle index has no manifests.
    #[error("no manifests in bundle index: {reference}")]
    EmptyBundle { reference: String },

    /// Reference resolved to something other than an image index.
    #[error("expected an image index at {reference}, found {found}")]
    NotAnIndex { reference: String, found: String },

    /// A classified bundle entry has no payload layer.
    #[error("no {role} layers in entry {digest} of bundle {reference}")]
    MissingLayer {
        role: String,
        digest: String,
        reference: String,
    },

    /// A payload layer could not be decoded.
    #[error("failed to decode {role} layer {digest}: {reason}")]
    Decode {
        role: String,
        digest: String,
        reason: String,
    },

    /// Dependency graph adjacency is inconsistent.
    #[error("malformed dependency graph: {0}")]
    MalformedGraph(String),

    /// Launch script template failed to build or render.
    #[error("entrypoint template error: {0}")]
    Template(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Manifest fetch failed.
    #[error("failed to fetch manifest '{reference}': {reason}")]
    ManifestFetchFailed { reference: String, reason: String },

    /// Blob fetch failed.
    #[error("failed to fetch blob {digest}: {reason}")]
    BlobFetchFailed { digest: String, reason: String },

    /// Blob not found in storage.
    #[error("blob not found: {digest}")]
    BlobNotFound { digest: String },

    /// Stored content does not hash to the digest it was stored under.
    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
