//! Bundle artifacts.
//!
//! A bundle is one OCI image index that carries everything a distributed
//! build needs: the package dependency graph, the build tasks, and the
//! multi-arch runtime image the tasks run in. Entries are told apart by the
//! `dev.wolfi.bundle` annotation on their index descriptor:
//!
//! ```text
//! bundle index
//! ├── image   dev.wolfi.bundle=graph    one application/json layer
//! ├── image   dev.wolfi.bundle=tasks    one application/json layer
//! └── index   dev.wolfi.bundle=runtime  per-arch images from compose
//! ```
//!
//! Entries with no annotation or an unknown value are ignored on decode.

use crate::constants::{
    BUNDLE_ANNOTATION, BUNDLE_ROLE_GRAPH, BUNDLE_ROLE_RUNTIME, BUNDLE_ROLE_TASKS,
    JSON_LAYER_MEDIA_TYPE,
};
use crate::error::{Error, Result};
use crate::image::{entry_annotation, manifest_kind, Image, ImageIndex, IndexEntry, OciManifest};
use crate::layer::Layer;
use crate::registry::{parse_reference, Registry};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use oci_distribution::Reference;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// =============================================================================
// Payload Types
// =============================================================================

/// Resource requests of a task. Empty fields fall back to builder defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, alias = "CPU", skip_serializing_if = "String::is_empty")]
    pub cpu: String,
    #[serde(default, alias = "Memory", skip_serializing_if = "String::is_empty")]
    pub memory: String,
}

/// One package build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub package: String,
    pub version: String,
    pub epoch: u64,
    /// Recipe path inside the runtime image.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_date_epoch: Option<DateTime<Utc>>,
}

/// Metadata of one dependency edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EdgeProperties {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub weight: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A directed edge `source → target`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub properties: EdgeProperties,
}

/// Adjacency map of the package dependency graph: node → neighbor → edge.
///
/// The engine only transports the graph; scheduling happens elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph(pub BTreeMap<String, BTreeMap<String, Edge>>);

impl Graph {
    /// Creates a graph with no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with no edges. Existing nodes are left alone.
    pub fn add_node(&mut self, node: &str) {
        self.0.entry(node.to_string()).or_default();
    }

    /// Adds the edge `source → target`, creating both nodes.
    pub fn add_edge(&mut self, source: &str, target: &str) {
        self.add_node(target);
        self.0.entry(source.to_string()).or_default().insert(
            target.to_string(),
            Edge {
                source: source.to_string(),
                target: target.to_string(),
                properties: EdgeProperties::default(),
            },
        );
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that every edge agrees with the keys it is stored under and
    /// that every target is itself a node.
    pub fn check(&self) -> Result<()> {
        for (node, neighbors) in &self.0 {
            for (neighbor, edge) in neighbors {
                if edge.source != *node || edge.target != *neighbor {
                    return Err(Error::MalformedGraph(format!(
                        "edge {} -> {} stored under {} -> {}",
                        edge.source, edge.target, node, neighbor
                    )));
                }
                if !self.0.contains_key(neighbor) {
                    return Err(Error::MalformedGraph(format!(
                        "edge {} -> {} points at unknown node",
                        node, neighbor
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// Role of a bundle index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleRole {
    Graph,
    Tasks,
    Runtime,
}

impl BundleRole {
    /// Returns the annotation value for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graph => BUNDLE_ROLE_GRAPH,
            Self::Tasks => BUNDLE_ROLE_TASKS,
            Self::Runtime => BUNDLE_ROLE_RUNTIME,
        }
    }

    /// Parses an annotation value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            BUNDLE_ROLE_GRAPH => Some(Self::Graph),
            BUNDLE_ROLE_TASKS => Some(Self::Tasks),
            BUNDLE_ROLE_RUNTIME => Some(Self::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for BundleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded bundle.
///
/// Any part may be missing if the artifact did not carry it. When an
/// artifact carries a role more than once, the last entry wins.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub graph: Graph,
    pub tasks: Vec<Task>,
    /// Digest-pinned reference to the runtime index.
    pub runtime: Option<Reference>,
}

/// Builds a bundle index from its three parts.
///
/// # Errors
///
/// [`Error::MalformedGraph`] if `graph` fails [`Graph::check`].
pub fn encode(graph: &Graph, tasks: &[Task], runtime: ImageIndex) -> Result<ImageIndex> {
    graph.check()?;

    let mut index = ImageIndex::empty();
    index.push(json_entry(BundleRole::Graph, graph)?);
    index.push(json_entry(BundleRole::Tasks, tasks)?);
    index.push(
        IndexEntry::index(runtime).with_annotation(BUNDLE_ANNOTATION, BundleRole::Runtime.as_str()),
    );

    info!(
        "Encoded bundle with {} node(s) and {} task(s)",
        graph.len(),
        tasks.len()
    );
    Ok(index)
}

fn json_entry<T: Serialize + ?Sized>(role: BundleRole, payload: &T) -> Result<IndexEntry> {
    let data = serde_json::to_vec(payload)?;
    let mut image = Image::empty();
    image.append_layer(Layer::raw(data, JSON_LAYER_MEDIA_TYPE), role.as_str())?;
    Ok(IndexEntry::image(image, None).with_annotation(BUNDLE_ANNOTATION, role.as_str()))
}

/// Fetches and decodes the bundle at `reference`.
///
/// # Errors
///
/// - [`Error::InvalidImageReference`] for a malformed reference
/// - [`Error::NotAnIndex`] if the reference is a single image
/// - [`Error::EmptyBundle`] if the index has no entries
/// - [`Error::MissingLayer`] / [`Error::Decode`] for a bad payload entry
pub async fn pull<R: Registry + ?Sized>(registry: &R, reference: &str) -> Result<Bundle> {
    let reference = parse_reference(reference)?;
    info!("Pulling bundle {}", reference);

    let (manifest, digest) = registry.manifest(&reference).await?;
    let index = match manifest {
        OciManifest::ImageIndex(index) => index,
        other => {
            return Err(Error::NotAnIndex {
                reference: reference.to_string(),
                found: manifest_kind(&other).to_string(),
            });
        }
    };

    if index.manifests.is_empty() {
        return Err(Error::EmptyBundle {
            reference: reference.to_string(),
        });
    }

    let mut bundle = Bundle::default();

    for desc in &index.manifests {
        let role = match entry_annotation(desc, BUNDLE_ANNOTATION) {
            Some(value) => match BundleRole::parse(value) {
                Some(role) => role,
                None => {
                    warn!(
                        "Ignoring entry {} with unknown {} value {:?}",
                        desc.digest, BUNDLE_ANNOTATION, value
                    );
                    continue;
                }
            },
            None => {
                debug!("Ignoring unclassified entry {}", desc.digest);
                continue;
            }
        };

        debug!("Decoding {} entry {}", role, desc.digest);

        let child = Reference::with_digest(
            reference.registry().to_string(),
            reference.repository().to_string(),
            desc.digest.clone(),
        );

        match role {
            BundleRole::Graph => {
                bundle.graph = fetch_payload(registry, &child, role, &reference).await?;
            }
            BundleRole::Tasks => {
                bundle.tasks = fetch_payload(registry, &child, role, &reference).await?;
            }
            BundleRole::Runtime => bundle.runtime = Some(child),
        }
    }

    info!(
        "Pulled bundle {} ({} task(s), runtime: {})",
        digest,
        bundle.tasks.len(),
        bundle.runtime.is_some()
    );
    Ok(bundle)
}

/// Reads the first layer of the image at `child` as JSON.
async fn fetch_payload<R, T>(
    registry: &R,
    child: &Reference,
    role: BundleRole,
    bundle: &Reference,
) -> Result<T>
where
    R: Registry + ?Sized,
    T: DeserializeOwned,
{
    let digest = child.digest().unwrap_or_default().to_string();

    let layer = match registry.manifest(child).await? {
        (OciManifest::Image(image), _) => image.layers.into_iter().next(),
        (OciManifest::ImageIndex(_), _) => None,
    }
    .ok_or_else(|| Error::MissingLayer {
        role: role.to_string(),
        digest: digest.clone(),
        reference: bundle.to_string(),
    })?;

    let blob = registry.blob(child, &layer).await?;
    decode_payload(&blob).map_err(|reason| Error::Decode {
        role: role.to_string(),
        digest: layer.digest.clone(),
        reason,
    })
}

/// Parses a JSON payload stored raw or gzip-compressed.
fn decode_payload<T: DeserializeOwned>(blob: &[u8]) -> std::result::Result<T, String> {
    if blob.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::new();
        GzDecoder::new(blob)
            .read_to_end(&mut json)
            .map_err(|e| e.to_string())?;
        serde_json::from_slice(&json).map_err(|e| e.to_string())
    } else {
        serde_json::from_slice(blob).map_err(|e| e.to_string())
    }
}
