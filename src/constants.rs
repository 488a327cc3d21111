//! # Bundle Engine Constants
//!
//! Defines the wire keys, media types, scheduling defaults and validation
//! bounds used throughout the bundle engine. These constants are the
//! **single source of truth**: the composer, decoder and pod builder never
//! hard-code these values inline.
//!
//! ## Modification Guidelines
//!
//! Values in the *Bundle Wire Format* and *Launch Script* sections are read
//! by other systems (schedulers, older bundles already in registries, the
//! generated container). Changing them breaks compatibility with artifacts
//! that were produced before the change.
//!
//! ## Cross-References
//!
//! - [`crate::compose`]: entrypoint command, default OS
//! - [`crate::bundle`]: classification annotation
//! - [`crate::pod`]: resource defaults, taints, labels
//! - [`crate::registry`]: reference validation

// =============================================================================
// Bundle Wire Format
// =============================================================================
//
// A bundle is an OCI image index. Each entry that matters carries the
// classification annotation below with one of three values.
// =============================================================================

/// Index-entry annotation key that classifies a bundle manifest.
pub const BUNDLE_ANNOTATION: &str = "dev.wolfi.bundle";

/// Classification value for the dependency graph manifest.
pub const BUNDLE_ROLE_GRAPH: &str = "graph";

/// Classification value for the task list manifest.
pub const BUNDLE_ROLE_TASKS: &str = "tasks";

/// Classification value for the runtime image (pinned by digest on pull).
pub const BUNDLE_ROLE_RUNTIME: &str = "runtime";

/// Media type of the JSON payload layers (graph and tasks).
pub const JSON_LAYER_MEDIA_TYPE: &str = "application/json";

// =============================================================================
// OCI Media Types
// =============================================================================
//
// Reference: <https://github.com/opencontainers/image-spec/blob/main/media-types.md>
// =============================================================================

/// OCI Image Manifest media type (single-platform image).
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI Image Index media type (multi-platform manifest list).
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// OCI Image Config media type (image configuration blob).
pub const OCI_IMAGE_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// OCI Layer media type (gzip-compressed tar archive).
pub const OCI_LAYER_MEDIA_TYPE_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// OCI Image Spec schema version written into manifests.
pub const OCI_SCHEMA_VERSION: u8 = 2;

/// Root filesystem type recorded in image configs.
pub const ROOTFS_TYPE: &str = "layers";

// =============================================================================
// Composed Image Layout
// =============================================================================

/// OS of every composed image when the base index has no entry for the arch.
pub const DEFAULT_OS: &str = "linux";

/// File name of the launch script inside the entrypoint layer.
pub const ENTRYPOINT_FILE: &str = "entrypoint.sh";

/// Permission bits of the launch script.
pub const ENTRYPOINT_MODE: u32 = 0o755;

/// Container entrypoint written into every composed image config.
pub const ENTRYPOINT_COMMAND: [&str; 2] = ["/bin/sh", "/entrypoint.sh"];

/// Working directory written into every composed image config.
pub const ENTRYPOINT_WORKING_DIR: &str = "/";

// =============================================================================
// Launch Script
// =============================================================================

/// Environment variable holding the package upload URL inside the pod.
pub const PACKAGES_UPLOAD_URL_ENV: &str = "PACKAGES_UPLOAD_URL";

/// File the pod host reads as the container's final status line.
pub const TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";

// =============================================================================
// Pod Resources
// =============================================================================
//
// Autopilot-style clusters reject pods without requests, so every pod gets
// these unless the task overrides them.
// =============================================================================

/// Default CPU request when the task specifies none.
pub const DEFAULT_CPU: &str = "2";

/// Default memory request when the task specifies none.
pub const DEFAULT_MEMORY: &str = "4Gi";

/// Largest core count schedulable on the available arm64 node shapes.
pub const MAX_ARM_CORES: f64 = 48.0;

/// Fraction of the requested CPU actually asked for.
///
/// Nodes reserve a little under 2% of their cores for system daemons
/// (64 cores → 63.77 allocatable, 16 → 15.89), so requesting the full core
/// count would push every pod onto the next larger machine.
pub const CPU_PACKING_FACTOR: f64 = 0.98;

/// Request written when a positive core count is below output precision.
pub const SMALLEST_CPU_REQUEST: &str = "0.000001";

// =============================================================================
// Pod Scheduling
// =============================================================================

/// Taint key carried by the dedicated builder node pools.
pub const BUILDER_TAINT_KEY: &str = "chainguard.dev/runner";

/// Taint value carried by the dedicated builder node pools.
pub const BUILDER_TAINT_VALUE: &str = "bundle-builder";

/// Well-known node architecture label (also used as a taint key on arm64 pools).
pub const ARCH_LABEL: &str = "kubernetes.io/arch";

/// Node label selecting the machine family.
pub const MACHINE_FAMILY_LABEL: &str = "cloud.google.com/machine-family";

/// Machine family forced for arm64 pods.
pub const ARM_MACHINE_FAMILY: &str = "t2a";

/// Pod label carrying the package name.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Pod label carrying the build architecture.
pub const BUILD_ARCH_LABEL: &str = "melange.chainguard.dev/arch";

/// Pod label carrying the package name for build tooling.
pub const BUILD_PACKAGE_LABEL: &str = "melange.chainguard.dev/package";

/// Name of the single build container.
pub const BUILD_CONTAINER_NAME: &str = "workspace";

/// Name of the scratch `emptyDir` volume.
pub const SCRATCH_VOLUME_NAME: &str = "tmp-dir-bundle-builder";

/// Mount point of the scratch volume.
pub const SCRATCH_MOUNT_PATH: &str = "/tmp";

/// Environment variable carrying the reproducible build timestamp.
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";

// =============================================================================
// Validation Patterns
// =============================================================================

/// Maximum OCI image reference length in bytes.
///
/// Registry implementations may have lower limits.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Valid characters for OCI image references.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`, `/`, `:`, `@`
pub const IMAGE_REF_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_./:@";
