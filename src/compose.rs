//! # Image Composer
//!
//! Builds the per-architecture runtime images of a bundle.
//!
//! ```text
//!   base index ──┐
//!                ├─► for each arch ─► base image (or empty linux/<arch>)
//!  entrypoints ──┘                      + common files layer
//!                                       + source files layer
//!                                       + entrypoint.sh layer
//!                                       + Entrypoint ["/bin/sh", "/entrypoint.sh"]
//!                                    ─► new index (one entry per arch)
//! ```
//!
//! ## Layer Order
//!
//! Layers are always appended common → source → entrypoint. Later layers
//! shadow earlier ones on matching paths, so source files can override
//! common files and nothing can override the launch script.
//!
//! ## Architecture Set
//!
//! The output contains exactly the requested architectures. Base entries
//! for other architectures are dropped. Every requested architecture must
//! have an entrypoint; this is checked before any layer is built, so a
//! failed compose never yields a partial index.
//!
//! Layers are rebuilt for every architecture; the trees are small.

use crate::constants::{ENTRYPOINT_COMMAND, ENTRYPOINT_WORKING_DIR};
use crate::entrypoint::Entrypoint;
use crate::error::{Error, Result};
use crate::image::{Image, ImageIndex, IndexEntry};
use crate::layer::Layer;
use crate::platform::Arch;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Composes one image per entrypoint architecture.
///
/// See [`compose_for`] for the per-architecture steps.
pub fn compose(
    base: &ImageIndex,
    entrypoints: &BTreeMap<Arch, Entrypoint>,
    common_files: &Path,
    source_files: &Path,
) -> Result<ImageIndex> {
    let archs: Vec<Arch> = entrypoints.keys().cloned().collect();
    compose_for(base, &archs, entrypoints, common_files, source_files)
}

/// Composes one image for each architecture in `archs`.
///
/// Duplicates in `archs` are ignored; entries are emitted in sorted
/// architecture order.
///
/// # Errors
///
/// - [`Error::MissingEntrypoint`] if any requested arch has no entrypoint
/// - [`Error::UnsupportedFileType`] / [`Error::Archive`] from the file trees
pub fn compose_for(
    base: &ImageIndex,
    archs: &[Arch],
    entrypoints: &BTreeMap<Arch, Entrypoint>,
    common_files: &Path,
    source_files: &Path,
) -> Result<ImageIndex> {
    let wanted: BTreeSet<&Arch> = archs.iter().collect();

    if let Some(missing) = wanted.iter().find(|a| !entrypoints.contains_key(**a)) {
        return Err(Error::MissingEntrypoint {
            arch: missing.to_string(),
            available: entrypoints.keys().map(Arch::to_string).collect(),
        });
    }

    info!(
        "Composing {} image(s) from {} base manifest(s)",
        wanted.len(),
        base.len()
    );

    let mut index = ImageIndex::empty();

    for arch in wanted {
        let (mut image, platform) = match base.image_for(arch) {
            Some((image, platform)) => (image.clone(), platform.clone()),
            None => {
                let platform = arch.platform();
                (Image::for_platform(&platform), platform)
            }
        };

        debug!("Building layers for {}", arch);

        let common = Layer::from_dir(common_files)?;
        let source = Layer::from_dir(source_files)?;
        let entrypoint = entrypoints[arch].layer()?;

        image.append_layer(common, "COPY common files /")?;
        image.append_layer(source, "COPY source files /")?;
        image.append_layer(entrypoint, "ADD entrypoint.sh /")?;

        image.update_config(|config| {
            config
                .set_entrypoint(Some(ENTRYPOINT_COMMAND.iter().map(|s| s.to_string()).collect()))
                .set_working_dir(Some(ENTRYPOINT_WORKING_DIR.to_string()));
        });

        index.push(IndexEntry::image(image, Some(platform)));
    }

    Ok(index)
}
