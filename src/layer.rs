//! OCI layer construction.
//!
//! Turns a directory tree or a single in-memory file into a tar stream and
//! exposes it as an OCI layer. The tar is held uncompressed; the gzip form
//! is produced on demand by [`Layer::open`], so a layer costs nothing until
//! somebody asks for its digest or bytes.
//!
//! ## Reproducibility
//!
//! Identical inputs must yield byte-identical layers, otherwise every
//! compose run would produce fresh digests:
//!
//! - directory entries are visited in lexical order
//! - headers are written with [`HeaderMode::Deterministic`] (no owners,
//!   fixed mtime, modes collapsed to 0644/0755)
//! - gzip headers carry no timestamp or file name
//!
//! ## Supported Entries
//!
//! Only directories and regular files. A symlink, socket, FIFO or device in
//! the tree is an error; it is never skipped silently.

use crate::constants::OCI_LAYER_MEDIA_TYPE_GZIP;
use crate::error::{Error, Result};
use crate::image::{blob_descriptor, OciDescriptor};
use crate::storage::sha256_digest;
use flate2::read::GzEncoder;
use flate2::Compression;
use std::fs::{File, FileType};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::debug;
use walkdir::WalkDir;

/// A single image layer.
///
/// Cloning is cheap; the content is shared.
#[derive(Debug, Clone)]
pub struct Layer {
    content: LayerContent,
}

#[derive(Debug, Clone)]
enum LayerContent {
    /// Uncompressed tar, gzip-compressed when opened.
    Tar(Arc<[u8]>),
    /// Blob stored verbatim (e.g. a JSON payload).
    Raw { data: Arc<[u8]>, media_type: String },
    /// Layer of a base image that already lives in a registry.
    Remote {
        descriptor: OciDescriptor,
        diff_id: Option<String>,
    },
}

impl Layer {
    /// Archives every directory and regular file under `root`.
    ///
    /// Entry names are relative to `root`; `root` itself is not an entry.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedFileType`] for anything but dirs and files
    /// - [`Error::Archive`] if the tree cannot be read
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut builder = Builder::new(Vec::new());
        builder.mode(HeaderMode::Deterministic);

        let walk = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walk {
            let entry = entry.map_err(|e| Error::Archive {
                path: e.path().unwrap_or(root).to_path_buf(),
                reason: e.to_string(),
            })?;
            append_entry(&mut builder, root, entry.path(), entry.file_type())?;
        }

        let tar = builder.into_inner().map_err(|e| archive_error(root, e))?;
        debug!("Archived {} ({} bytes)", root.display(), tar.len());

        Ok(Self::from_tar(tar))
    }

    /// Wraps one buffer as a single-file archive.
    pub fn from_file(name: &str, data: &[u8], mode: u32) -> Result<Self> {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_mtime(0);

        let mut builder = Builder::new(Vec::new());
        builder
            .append_data(&mut header, name, data)
            .map_err(|e| archive_error(Path::new(name), e))?;
        let tar = builder
            .into_inner()
            .map_err(|e| archive_error(Path::new(name), e))?;

        Ok(Self::from_tar(tar))
    }

    /// Wraps an already-built uncompressed tar stream.
    pub fn from_tar(tar: Vec<u8>) -> Self {
        Self {
            content: LayerContent::Tar(Arc::from(tar)),
        }
    }

    /// Stores `data` verbatim with the given media type.
    pub fn raw(data: Vec<u8>, media_type: &str) -> Self {
        Self {
            content: LayerContent::Raw {
                data: Arc::from(data),
                media_type: media_type.to_string(),
            },
        }
    }

    /// References a layer held by a registry.
    ///
    /// `diff_id` comes from the owning image's config, when known.
    pub fn remote(descriptor: OciDescriptor, diff_id: Option<String>) -> Self {
        Self {
            content: LayerContent::Remote {
                descriptor,
                diff_id,
            },
        }
    }

    /// Returns true if the layer content is not held locally.
    pub fn is_remote(&self) -> bool {
        matches!(self.content, LayerContent::Remote { .. })
    }

    /// Returns the layer media type.
    pub fn media_type(&self) -> &str {
        match &self.content {
            LayerContent::Tar(_) => OCI_LAYER_MEDIA_TYPE_GZIP,
            LayerContent::Raw { media_type, .. } => media_type,
            LayerContent::Remote { descriptor, .. } => &descriptor.media_type,
        }
    }

    /// Opens the layer blob as it is stored in a registry.
    ///
    /// Tar layers are gzip-compressed while being read.
    pub fn open(&self) -> Result<Box<dyn Read + Send + '_>> {
        match &self.content {
            LayerContent::Tar(tar) => {
                Ok(Box::new(GzEncoder::new(&tar[..], Compression::default())))
            }
            LayerContent::Raw { data, .. } => Ok(Box::new(&data[..])),
            LayerContent::Remote { descriptor, .. } => Err(Error::LayerUnavailable {
                digest: descriptor.digest.clone(),
            }),
        }
    }

    /// Returns the stored (compressed) blob.
    pub fn compressed(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Returns the uncompressed content.
    pub fn uncompressed(&self) -> Result<Vec<u8>> {
        match &self.content {
            LayerContent::Tar(tar) => Ok(tar.to_vec()),
            LayerContent::Raw { data, .. } => Ok(data.to_vec()),
            LayerContent::Remote { descriptor, .. } => Err(Error::LayerUnavailable {
                digest: descriptor.digest.clone(),
            }),
        }
    }

    /// Returns the digest of the stored blob.
    pub fn digest(&self) -> Result<String> {
        match &self.content {
            LayerContent::Remote { descriptor, .. } => Ok(descriptor.digest.clone()),
            _ => Ok(sha256_digest(&self.compressed()?)),
        }
    }

    /// Returns the digest of the uncompressed content (the config `diff_id`).
    pub fn diff_id(&self) -> Result<String> {
        match &self.content {
            LayerContent::Tar(tar) => Ok(sha256_digest(tar)),
            LayerContent::Raw { data, .. } => Ok(sha256_digest(data)),
            LayerContent::Remote {
                descriptor,
                diff_id,
            } => diff_id.clone().ok_or_else(|| Error::LayerUnavailable {
                digest: descriptor.digest.clone(),
            }),
        }
    }

    /// Returns the manifest descriptor of this layer.
    pub fn descriptor(&self) -> Result<OciDescriptor> {
        if let LayerContent::Remote { descriptor, .. } = &self.content {
            return Ok(descriptor.clone());
        }

        Ok(blob_descriptor(self.media_type(), &self.compressed()?))
    }
}

/// Appends one walked entry under its path relative to `root`.
fn append_entry(
    builder: &mut Builder<Vec<u8>>,
    root: &Path,
    path: &Path,
    file_type: FileType,
) -> Result<()> {
    let name = path.strip_prefix(root).map_err(|e| Error::Archive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    // the walk does not follow symlinks, so they arrive here as such
    if file_type.is_dir() {
        builder
            .append_dir(name, path)
            .map_err(|e| archive_error(path, e))?;
    } else if file_type.is_file() {
        let mut file = File::open(path).map_err(|e| archive_error(path, e))?;
        builder
            .append_file(name, &mut file)
            .map_err(|e| archive_error(path, e))?;
    } else {
        return Err(Error::UnsupportedFileType {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

fn archive_error(path: &Path, e: std::io::Error) -> Error {
    Error::Archive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
