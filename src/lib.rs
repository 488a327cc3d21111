//! # magikbundle
//!
//! **OCI Bundle Engine for Distributed Package Builds**
//!
//! Packs everything a fleet of build pods needs into one OCI image index
//! (the *bundle*), reads it back on the other side, and describes the pod
//! that builds each package.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          magikbundle                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐     │
//! │  │ mount specs  │──►│  entrypoint  │──►│       compose        │     │
//! │  │ bucket:/path │   │ launch script│   │ base + common +      │     │
//! │  └──────────────┘   └──────────────┘   │ source + entrypoint  │     │
//! │                                        └──────────┬───────────┘     │
//! │                                                   │ runtime index   │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────▼───────────┐     │
//! │  │  pod::podspec│◄──│ bundle::pull │◄──│    bundle::encode    │     │
//! │  │ one pod/task │   │ graph, tasks,│   │ graph + tasks +      │     │
//! │  │    per arch  │   │ runtime ref  │   │ runtime → index      │     │
//! │  └──────────────┘   └──────┬───────┘   └──────────────────────┘     │
//! │                            │                                        │
//! ├────────────────────────────┼────────────────────────────────────────┤
//! │                   Registry trait                                    │
//! │  ┌────────────────────┐  ┌────────────────────────────────────┐     │
//! │  │  RemoteRegistry    │  │  MemoryRegistry                    │     │
//! │  │  oci-distribution  │  │  BlobStore (sha256-verified)       │     │
//! │  └────────────────────┘  └────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Bundle Layout
//!
//! | Entry annotation `dev.wolfi.bundle` | Content                          |
//! |-------------------------------------|----------------------------------|
//! | `graph`                             | dependency graph, one JSON layer |
//! | `tasks`                             | build tasks, one JSON layer      |
//! | `runtime`                           | per-arch runtime image index     |
//!
//! # Reproducibility
//!
//! Composing the same inputs twice yields the same digests: file trees are
//! archived in lexical order with normalized headers, and gzip output
//! carries no timestamps.
//!
//! # Example
//!
//! ```rust,ignore
//! use magikbundle::{compose, encode, pull, podspec, Arch, Entrypoint, ImageIndex, MemoryRegistry};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> magikbundle::Result<()> {
//!     let entrypoints = BTreeMap::from([
//!         (Arch::Amd64, Entrypoint::new().flag("--arch x86_64")),
//!         (Arch::Arm64, Entrypoint::new().flag("--arch aarch64")),
//!     ]);
//!     let runtime = compose(&ImageIndex::empty(), &entrypoints, "common".as_ref(), "src".as_ref())?;
//!     let index = encode(&graph, &tasks, runtime)?;
//!
//!     let registry = MemoryRegistry::new();
//!     registry.publish("localhost/bundle:latest", &index)?;
//!
//!     let bundle = pull(&registry, "localhost/bundle:latest").await?;
//!     let image = bundle.runtime.expect("runtime entry");
//!     for task in &bundle.tasks {
//!         let pod = podspec(task, &image, "arm64", "", "builder", "builds")?;
//!         println!("{}", pod.to_yaml()?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod compose;
pub mod constants;
pub mod entrypoint;
pub mod error;
pub mod image;
pub mod layer;
pub mod mount;
pub mod platform;
pub mod pod;
pub mod registry;
pub mod storage;

// Re-exports
pub use bundle::{encode, pull, Bundle, BundleRole, Edge, EdgeProperties, Graph, Resources, Task};
pub use compose::{compose, compose_for};
pub use entrypoint::Entrypoint;
pub use error::{Error, Result};
pub use image::{load_index, Image, ImageIndex, IndexChild, IndexEntry};
pub use layer::Layer;
pub use mount::GcsFuseMount;
pub use platform::Arch;
pub use pod::{podspec, Pod, PodConfig};
pub use registry::{
    parse_reference, Anonymous, Keychain, MemoryRegistry, Registry, RegistryConfig,
    RemoteRegistry, StaticKeychain,
};
pub use storage::BlobStore;
