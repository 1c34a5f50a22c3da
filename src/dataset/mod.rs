//! Dataset handling for horse-breed images
//!
//! - `catalog`: `labels.json` + image directory -> class vocabulary and samples
//! - `augmentation`: training/evaluation transforms
//! - `provider`: seeded train/validation split and per-partition sample providers
//! - `batcher`: Burn batcher turning items into device tensors
//! - `prefetch`: worker pool that decodes batches ahead of the training loop

pub mod augmentation;
pub mod batcher;
pub mod catalog;
pub mod prefetch;
pub mod provider;

pub use augmentation::{AugmentationConfig, Transform, TransformMode, IMAGENET_MEAN, IMAGENET_STD};
pub use batcher::{HorseBatch, HorseBatcher};
pub use catalog::{ClassCatalog, Sample, MANIFEST_FILE};
pub use prefetch::BatchLoader;
pub use provider::{split, DatasetSplit, HorseItem, Partition, PartitionRole, SampleProvider};
