//! Partitions and sample providers
//!
//! The sample list is split once into train/validation index sets. Each
//! partition then gets its own [`SampleProvider`] that is bound to a transform
//! for its whole lifetime.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageReader};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::{Transform, TransformMode};
use crate::dataset::catalog::Sample;
use crate::utils::error::{EquiVisionError, Result};

/// Which side of the split a partition belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionRole {
    Train,
    Validation,
}

impl std::fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionRole::Train => write!(f, "train"),
            PartitionRole::Validation => write!(f, "val"),
        }
    }
}

/// A subset of sample indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub role: PartitionRole,
    pub indices: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// The one authoritative train/validation split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Partition,
    pub validation: Partition,
}

/// Split `0..num_samples` with a single seeded permutation.
///
/// The first `floor(num_samples * train_ratio)` permuted indices form the
/// training partition; the rest form the validation partition.
pub fn split(num_samples: usize, train_ratio: f64, seed: u64) -> DatasetSplit {
    let mut indices: Vec<usize> = (0..num_samples).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train_len = ((num_samples as f64) * train_ratio.clamp(0.0, 1.0)).floor() as usize;
    let validation = indices.split_off(train_len.min(num_samples));

    DatasetSplit {
        train: Partition {
            role: PartitionRole::Train,
            indices,
        },
        validation: Partition {
            role: PartitionRole::Validation,
            indices: validation,
        },
    }
}

/// One transformed image and its class index
#[derive(Debug, Clone)]
pub struct HorseItem {
    /// CHW, normalized
    pub image: Vec<f32>,
    pub label: usize,
}

/// Decodes and transforms the samples of one partition.
///
/// Holds only shared, read-only state, so `get` can be called from many
/// worker threads at once.
#[derive(Debug, Clone)]
pub struct SampleProvider {
    samples: Arc<[Sample]>,
    partition: Partition,
    transform: Transform,
}

impl SampleProvider {
    /// Bind a partition to its transform.
    ///
    /// Binding a training-mode transform to a validation partition is rejected
    /// with [`EquiVisionError::AugmentationLeak`].
    pub fn new(samples: Arc<[Sample]>, partition: Partition, transform: Transform) -> Result<Self> {
        if partition.role == PartitionRole::Validation && transform.mode() == TransformMode::Training {
            return Err(EquiVisionError::AugmentationLeak);
        }

        if let Some(&bad) = partition.indices.iter().find(|&&i| i >= samples.len()) {
            return Err(EquiVisionError::Config(format!(
                "partition index {} out of range for {} samples",
                bad,
                samples.len()
            )));
        }

        Ok(Self {
            samples,
            partition,
            transform,
        })
    }

    /// Decode the `index`-th sample of this partition and transform it
    pub fn get(&self, index: usize) -> Result<HorseItem> {
        let sample_idx = *self.partition.indices.get(index).ok_or_else(|| {
            EquiVisionError::Config(format!(
                "index {} out of range for {} partition of {}",
                index,
                self.partition.role,
                self.len()
            ))
        })?;
        let sample = &self.samples[sample_idx];

        let img = decode_image(&sample.path)?;
        Ok(HorseItem {
            image: self.transform.apply(&img),
            label: sample.label,
        })
    }

    pub fn len(&self) -> usize {
        self.partition.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partition.is_empty()
    }

    pub fn role(&self) -> PartitionRole {
        self.partition.role
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Sample backing the `index`-th partition entry
    pub fn sample(&self, index: usize) -> Option<&Sample> {
        self.partition.indices.get(index).map(|&i| &self.samples[i])
    }
}

/// Open and decode an image, forced to 3-channel RGB
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    let decode_err = |msg: String| EquiVisionError::Decode(path.to_path_buf(), msg);

    let img = ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))?;

    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::catalog::tests::{write_manifest, write_png};
    use crate::dataset::catalog::ClassCatalog;
    use tempfile::TempDir;

    fn fixture(n: usize) -> (TempDir, ClassCatalog) {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), r#"{"01":"Arabian","02":"Friesian"}"#);
        for i in 0..n {
            let id = if i % 2 == 0 { "01" } else { "02" };
            write_png(&dir.path().join(format!("{}_{:03}.png", id, i)), (i * 20) as u8);
        }
        let catalog = ClassCatalog::build(dir.path()).unwrap();
        (dir, catalog)
    }

    #[test]
    fn test_split_sizes_and_disjoint() {
        let s = split(10, 0.8, 42);
        assert_eq!(s.train.len(), 8);
        assert_eq!(s.validation.len(), 2);

        let mut all: Vec<usize> = s.train.indices.iter().chain(&s.validation.indices).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_seeded() {
        assert_eq!(split(50, 0.8, 1), split(50, 0.8, 1));
        assert_ne!(split(50, 0.8, 1).train.indices, split(50, 0.8, 2).train.indices);
    }

    #[test]
    fn test_validation_rejects_training_transform() {
        let (_dir, catalog) = fixture(4);
        let s = split(catalog.len(), 0.5, 0);

        let err = SampleProvider::new(catalog.samples(), s.validation.clone(), Transform::training(8))
            .unwrap_err();
        assert!(matches!(err, EquiVisionError::AugmentationLeak));

        assert!(SampleProvider::new(catalog.samples(), s.validation, Transform::evaluation(8)).is_ok());
        assert!(SampleProvider::new(catalog.samples(), s.train, Transform::training(8)).is_ok());
    }

    #[test]
    fn test_get_returns_transformed_item() {
        let (_dir, catalog) = fixture(6);
        let s = split(catalog.len(), 0.5, 3);
        let provider = SampleProvider::new(catalog.samples(), s.validation, Transform::evaluation(8)).unwrap();

        assert_eq!(provider.len(), 3);
        for i in 0..provider.len() {
            let item = provider.get(i).unwrap();
            assert_eq!(item.image.len(), 3 * 8 * 8);
            assert_eq!(item.label, provider.sample(i).unwrap().label);
        }
        assert!(provider.get(3).is_err());
    }

    #[test]
    fn test_undecodable_image_is_decode_error() {
        let (dir, _) = fixture(2);
        std::fs::write(dir.path().join("01_broken.png"), b"not a png").unwrap();
        let catalog = ClassCatalog::build(dir.path()).unwrap();

        let all = Partition {
            role: PartitionRole::Validation,
            indices: (0..catalog.len()).collect(),
        };
        let provider = SampleProvider::new(catalog.samples(), all, Transform::evaluation(8)).unwrap();

        let broken = (0..provider.len())
            .find(|&i| provider.sample(i).unwrap().path.ends_with("01_broken.png"))
            .unwrap();
        assert!(matches!(provider.get(broken), Err(EquiVisionError::Decode(..))));
    }

    #[test]
    fn test_concurrent_get() {
        let (_dir, catalog) = fixture(8);
        let s = split(catalog.len(), 1.0, 0);
        let provider = SampleProvider::new(catalog.samples(), s.train, Transform::training(8)).unwrap();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let provider = &provider;
                    scope.spawn(move || provider.get(t * 2).unwrap().image.len())
                })
                .collect();
            for h in handles {
                assert_eq!(h.join().unwrap(), 3 * 8 * 8);
            }
        });
    }
}
