//! Tests for the image composer.
//!
//! Validates layer order, architecture selection, base image reuse and
//! reproducibility of composed indexes.

use magikbundle::image::Platform;
use magikbundle::{
    compose, compose_for, Arch, Entrypoint, Error, Image, ImageIndex, IndexChild, IndexEntry,
    Layer,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tar::Archive;
use tempfile::TempDir;

fn file_trees() -> (TempDir, TempDir) {
    let common = TempDir::new().unwrap();
    fs::write(common.path().join("melange.yaml"), "common: true\n").unwrap();

    let source = TempDir::new().unwrap();
    fs::create_dir(source.path().join("glibc")).unwrap();
    fs::write(source.path().join("glibc/glibc.yaml"), "package: glibc\n").unwrap();

    (common, source)
}

fn two_arch_entrypoints() -> BTreeMap<Arch, Entrypoint> {
    BTreeMap::from([
        (Arch::Amd64, Entrypoint::new().flag("--arch x86_64")),
        (Arch::Arm64, Entrypoint::new().flag("--arch aarch64")),
    ])
}

fn images(index: &ImageIndex) -> Vec<(&Image, &Platform)> {
    index
        .entries()
        .iter()
        .map(|e| match (&e.child, &e.platform) {
            (IndexChild::Image(image), Some(platform)) => (image, platform),
            _ => panic!("composed entries must be platform-bound images"),
        })
        .collect()
}

fn tar_paths(layer: &Layer) -> Vec<String> {
    let tar = layer.uncompressed().unwrap();
    Archive::new(&tar[..])
        .entries()
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            let path = e.path().unwrap().to_string_lossy().to_string();
            path.trim_end_matches('/').to_string()
        })
        .collect()
}

fn compose_trees(base: &ImageIndex, common: &Path, source: &Path) -> ImageIndex {
    compose(base, &two_arch_entrypoints(), common, source).unwrap()
}

// =============================================================================
// Empty Base
// =============================================================================

#[test]
fn test_empty_base_two_archs() {
    let (common, source) = file_trees();
    let index = compose_trees(&ImageIndex::empty(), common.path(), source.path());

    let images = images(&index);
    assert_eq!(images.len(), 2, "one image per entrypoint");

    let archs: Vec<&str> = images.iter().map(|(_, p)| p.architecture.as_str()).collect();
    assert_eq!(archs, vec!["amd64", "arm64"], "entries in sorted arch order");

    for (image, platform) in images {
        assert_eq!(platform.os, "linux");
        assert_eq!(image.layers().len(), 3, "common, source, entrypoint");
        assert_eq!(image.config_file().architecture().to_string(), platform.architecture);
        assert_eq!(image.config_file().rootfs().diff_ids().len(), 3);
        assert_eq!(image.config_file().history().len(), 3);
    }
}

#[test]
fn test_layer_order_and_entrypoint_config() {
    let (common, source) = file_trees();
    let index = compose_trees(&ImageIndex::empty(), common.path(), source.path());
    let (image, _) = images(&index)[0];

    assert_eq!(tar_paths(&image.layers()[0]), vec!["melange.yaml"]);
    assert_eq!(
        tar_paths(&image.layers()[1]),
        vec!["glibc", "glibc/glibc.yaml"]
    );
    assert_eq!(tar_paths(&image.layers()[2]), vec!["entrypoint.sh"]);

    let config = image.config().unwrap();
    assert_eq!(
        config.entrypoint(),
        &Some(vec!["/bin/sh".to_string(), "/entrypoint.sh".to_string()])
    );
    assert_eq!(config.working_dir().as_deref(), Some("/"));
}

#[test]
fn test_entrypoint_differs_per_arch() {
    let (common, source) = file_trees();
    let index = compose_trees(&ImageIndex::empty(), common.path(), source.path());
    let images = images(&index);

    let scripts: Vec<String> = images
        .iter()
        .map(|(image, _)| {
            let tar = image.layers()[2].uncompressed().unwrap();
            String::from_utf8_lossy(&tar).to_string()
        })
        .collect();

    assert!(scripts[0].contains("--arch x86_64"));
    assert!(scripts[1].contains("--arch aarch64"));
}

// =============================================================================
// Architecture Selection
// =============================================================================

#[test]
fn test_missing_entrypoint_fails_before_work() {
    let (common, _) = file_trees();
    let entrypoints = BTreeMap::from([(Arch::Amd64, Entrypoint::new())]);

    let result = compose_for(
        &ImageIndex::empty(),
        &[Arch::Amd64, Arch::Riscv64],
        &entrypoints,
        common.path(),
        Path::new("/nonexistent/source"),
    );

    match result {
        Err(Error::MissingEntrypoint { arch, available }) => {
            assert_eq!(arch, "riscv64");
            assert_eq!(available, vec!["amd64".to_string()]);
        }
        other => panic!("expected MissingEntrypoint, got {:?}", other.map(|i| i.len())),
    }
}

#[test]
fn test_compose_for_subset_and_duplicates() {
    let (common, source) = file_trees();
    let index = compose_for(
        &ImageIndex::empty(),
        &[Arch::Arm64, Arch::Arm64],
        &two_arch_entrypoints(),
        common.path(),
        source.path(),
    )
    .unwrap();

    assert_eq!(index.architectures(), vec![Arch::Arm64]);
}

#[test]
fn test_base_image_is_reused() {
    let (common, source) = file_trees();

    let mut base_image = Image::for_platform(&Arch::Amd64.platform());
    base_image
        .append_layer(Layer::from_file("etc/os-release", b"ID=wolfi\n", 0o644).unwrap(), "base")
        .unwrap();
    base_image.update_config(|c| {
        c.set_env(Some(vec!["PATH=/usr/bin".to_string()]));
    });

    let mut base = ImageIndex::empty();
    base.push(IndexEntry::image(
        base_image,
        Some(Arch::Amd64.platform()),
    ));
    // A base arch that is not requested is dropped.
    base.push(IndexEntry::image(
        Image::for_platform(&Arch::S390x.platform()),
        Some(Arch::S390x.platform()),
    ));

    let index = compose_trees(&base, common.path(), source.path());
    assert_eq!(index.architectures(), vec![Arch::Amd64, Arch::Arm64]);

    let images = images(&index);
    let (amd64, _) = images[0];
    assert_eq!(amd64.layers().len(), 4, "base layer plus three");
    assert_eq!(tar_paths(&amd64.layers()[0]), vec!["etc/os-release"]);
    assert_eq!(
        amd64.config().and_then(|c| c.env().clone()),
        Some(vec!["PATH=/usr/bin".to_string()]),
        "base config survives"
    );

    let (arm64, _) = images[1];
    assert_eq!(arm64.layers().len(), 3, "no arm64 base: built from scratch");
}

#[test]
fn test_arm_variant_platform() {
    let (common, source) = file_trees();
    let entrypoints = BTreeMap::from([(Arch::parse("armv7"), Entrypoint::new())]);
    let index = compose(&ImageIndex::empty(), &entrypoints, common.path(), source.path()).unwrap();

    let (_, platform) = images(&index)[0];
    assert_eq!(platform.architecture, "arm");
    assert_eq!(platform.variant.as_deref(), Some("v7"));
}

// =============================================================================
// Reproducibility
// =============================================================================

#[test]
fn test_identical_inputs_identical_digests() {
    let (common_a, source_a) = file_trees();
    let (common_b, source_b) = file_trees();

    let a = compose_trees(&ImageIndex::empty(), common_a.path(), source_a.path());
    let b = compose_trees(&ImageIndex::empty(), common_b.path(), source_b.path());

    assert_eq!(a.digest().unwrap(), b.digest().unwrap());
}

#[test]
fn test_changed_source_changes_digest() {
    let (common, source) = file_trees();
    let before = compose_trees(&ImageIndex::empty(), common.path(), source.path());

    fs::write(source.path().join("glibc/glibc.yaml"), "package: glibc\nepoch: 1\n").unwrap();
    let after = compose_trees(&ImageIndex::empty(), common.path(), source.path());

    assert_ne!(before.digest().unwrap(), after.digest().unwrap());
}

#[cfg(unix)]
#[test]
fn test_symlink_in_tree_fails() {
    let (common, source) = file_trees();
    std::os::unix::fs::symlink("glibc", source.path().join("link")).unwrap();

    let result = compose(
        &ImageIndex::empty(),
        &two_arch_entrypoints(),
        common.path(),
        source.path(),
    );
    assert!(matches!(result, Err(Error::UnsupportedFileType { .. })));
}
