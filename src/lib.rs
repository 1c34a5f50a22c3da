//! # EquiVision
//!
//! Horse-breed image classification with the Burn framework: a pretrained
//! backbone with a fresh linear head is fine-tuned on a labelled image
//! directory, and the best validation checkpoint is kept.
//!
//! ## Modules
//!
//! - `dataset`: label catalog, augmentation, seeded split, sample providers and batching
//! - `model`: EfficientNet-B0 / ResNet-18 backbones and the classifier head
//! - `training`: configuration, the epoch loop, LR schedules and checkpoints
//! - `inference`: checkpoint loading and single-image prediction
//! - `backend`: CPU / CUDA device selection
//! - `utils`: errors, logging and metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use equivision::backend::CpuTrainingBackend;
//! use equivision::training::{run_training, TrainingConfig};
//!
//! let config = TrainingConfig::new("data/horses", "output");
//! let outcome = run_training::<CpuTrainingBackend>(&config, Default::default())?;
//! println!("best val acc {:.4}", outcome.best_accuracy);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{ClassCatalog, SampleProvider, Transform, TransformMode};
pub use inference::{load_checkpoint, load_model, Predictor};
pub use model::{ClassifierConfig, HorseClassifier, ModelArchitecture};
pub use training::{run_training, TrainingConfig, TrainingOutcome, TrainingRun};
pub use utils::error::{EquiVisionError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
