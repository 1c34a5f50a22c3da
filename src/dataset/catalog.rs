//! Label catalog
//!
//! Resolves a data directory into a sorted breed vocabulary and the list of
//! labelled samples. The directory is expected to look like:
//!
//! ```text
//! data_dir/
//! ├── labels.json        {"01": "Arabian", "02": "Friesian", ...}
//! ├── 01_001.png
//! ├── 01_002.png
//! └── 02_001.png
//! ```
//!
//! The breed identifier of a file is the part of its name before the first `_`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{EquiVisionError, Result};

/// Name of the identifier -> breed mapping file inside the data directory
pub const MANIFEST_FILE: &str = "labels.json";

/// File extensions scanned as images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// One labelled image on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub path: PathBuf,
    /// Index into [`ClassCatalog::classes`]
    pub label: usize,
}

/// Immutable breed vocabulary and sample list
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    root_dir: PathBuf,
    id_to_name: BTreeMap<String, String>,
    classes: Vec<String>,
    class_to_index: HashMap<String, usize>,
    samples: Arc<[Sample]>,
    skipped: usize,
}

impl ClassCatalog {
    /// Build the catalog from `root_dir`.
    ///
    /// Fails with [`EquiVisionError::MissingManifest`] when `labels.json` is absent.
    /// Images whose identifier is not in the manifest are skipped.
    pub fn build<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        let id_to_name = read_manifest(&root_dir.join(MANIFEST_FILE))?;

        let mut classes: Vec<String> = id_to_name.values().cloned().collect();
        classes.sort();
        classes.dedup();

        let class_to_index: HashMap<String, usize> = classes
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        let mut samples = Vec::new();
        let mut skipped = 0usize;

        // Sorted so sample indices, and therefore the seeded split, are stable across runs
        for entry in WalkDir::new(&root_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if !is_image(path) {
                continue;
            }

            let Some(identifier) = breed_identifier(path) else {
                skipped += 1;
                continue;
            };

            match id_to_name.get(identifier) {
                Some(name) => samples.push(Sample {
                    path: path.to_path_buf(),
                    label: class_to_index[name],
                }),
                None => {
                    debug!("Skipping {:?}: identifier '{}' not in manifest", path, identifier);
                    skipped += 1;
                }
            }
        }

        info!(
            "Catalog: {} classes, {} samples ({} skipped) from {:?}",
            classes.len(),
            samples.len(),
            skipped,
            root_dir
        );

        Ok(Self {
            root_dir,
            id_to_name,
            classes,
            class_to_index,
            samples: samples.into(),
            skipped,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn id_to_name(&self) -> &BTreeMap<String, String> {
        &self.id_to_name
    }

    /// Sorted, de-duplicated breed names; position is the class index
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.class_to_index.get(name).copied()
    }

    pub fn class_to_index(&self) -> &HashMap<String, usize> {
        &self.class_to_index
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Shared, read-only sample list
    pub fn samples(&self) -> Arc<[Sample]> {
        Arc::clone(&self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Image files ignored because their identifier is unknown
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of samples per class, in class-index order
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for sample in self.samples.iter() {
            counts[sample.label] += 1;
        }
        counts
    }
}

fn read_manifest(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.is_file() {
        return Err(EquiVisionError::MissingManifest(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| EquiVisionError::InvalidManifest(path.to_path_buf(), e.to_string()))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Token before the first `_` of the file name, extension included when there is no `_`
fn breed_identifier(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.split('_').next()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    pub(crate) fn write_png(path: &Path, shade: u8) {
        let img = RgbImage::from_fn(8, 8, |x, y| {
            Rgb([shade, (x * 16) as u8, (y * 16) as u8])
        });
        img.save(path).unwrap();
    }

    pub(crate) fn write_manifest(dir: &Path, json: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), json).unwrap();
    }

    #[test]
    fn test_unknown_identifiers_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), r#"{"01":"Arabian","02":"Friesian"}"#);
        write_png(&dir.path().join("01_001.png"), 10);
        write_png(&dir.path().join("02_001.png"), 20);
        write_png(&dir.path().join("99_001.png"), 30);

        let catalog = ClassCatalog::build(dir.path()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.classes(), ["Arabian", "Friesian"]);
        assert_eq!(catalog.class_index("Arabian"), Some(0));
        assert_eq!(catalog.class_index("Friesian"), Some(1));
        assert_eq!(catalog.skipped(), 1);
        assert!(catalog
            .samples()
            .iter()
            .all(|s| !s.path.ends_with("99_001.png")));
    }

    #[test]
    fn test_classes_sorted_and_unique() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"{"05":"Shire","01":"Arabian","03":"Arabian","02":"Friesian"}"#,
        );

        let catalog = ClassCatalog::build(dir.path()).unwrap();

        assert_eq!(catalog.classes(), ["Arabian", "Friesian", "Shire"]);
        let mut indices: Vec<usize> = catalog.class_to_index().values().copied().collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_shared_name_maps_to_one_label() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), r#"{"01":"Arabian","03":"Arabian"}"#);
        write_png(&dir.path().join("01_a.png"), 1);
        write_png(&dir.path().join("03_b.png"), 2);

        let catalog = ClassCatalog::build(dir.path()).unwrap();
        assert!(catalog.samples().iter().all(|s| s.label == 0));
        assert_eq!(catalog.class_counts(), vec![2]);
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("01_001.png"), 10);

        let err = ClassCatalog::build(dir.path()).unwrap_err();
        assert!(matches!(err, EquiVisionError::MissingManifest(_)));
    }

    #[test]
    fn test_malformed_manifest() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), r#"["Arabian"]"#);

        let err = ClassCatalog::build(dir.path()).unwrap_err();
        assert!(matches!(err, EquiVisionError::InvalidManifest(..)));
    }

    #[test]
    fn test_non_images_ignored() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), r#"{"01":"Arabian"}"#);
        write_png(&dir.path().join("01_001.png"), 10);
        std::fs::write(dir.path().join("01_notes.txt"), "x").unwrap();

        let catalog = ClassCatalog::build(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.skipped(), 0);
    }

    #[test]
    fn test_identifier_before_first_underscore() {
        assert_eq!(breed_identifier(Path::new("/x/01_a_b.png")), Some("01"));
        assert_eq!(breed_identifier(Path::new("/x/07.png")), Some("07.png"));
    }

    #[test]
    fn test_file_without_underscore_is_not_matched() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), r#"{"01":"Arabian"}"#);
        write_png(&dir.path().join("01_001.png"), 10);
        write_png(&dir.path().join("01.png"), 10);

        let catalog = ClassCatalog::build(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.skipped(), 1);
    }
}
