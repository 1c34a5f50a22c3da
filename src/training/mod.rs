//! Training: configuration, the epoch loop, LR schedules and checkpoints
//!
//! One run goes through `Initializing -> (train phase, validate phase) x epochs
//! -> Completed`. The state that survives across epochs (best accuracy, best
//! weights, history) lives in an explicit [`TrainingRun`] value.

pub mod checkpoint;
pub mod scheduler;
pub mod trainer;

use std::path::{Path, PathBuf};

use burn::optim::decay::WeightDecayConfig;
use burn::optim::AdamConfig;
use serde::{Deserialize, Serialize};

use crate::model::ClassifierConfig;
use crate::utils::error::{EquiVisionError, Result, ResultExt};

pub use checkpoint::{CheckpointMetadata, CheckpointWriter};
pub use scheduler::{LearningRateScheduler, SchedulerType};
pub use trainer::{evaluate, run_training, EpochRecord, Trainer, TrainingOutcome, TrainingRun};

pub const DEFAULT_EPOCHS: usize = 25;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
pub const DEFAULT_TRAIN_RATIO: f64 = 0.8;
pub const DEFAULT_IMAGE_SIZE: u32 = 224;
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Everything a training run needs; loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory with `labels.json` and the images
    pub data_dir: PathBuf,
    /// Where the best checkpoint is written
    pub output_dir: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of samples in the training partition
    pub train_ratio: f64,
    pub image_size: u32,
    /// Decode/augment threads
    pub num_workers: usize,
    /// Decoded batches allowed to queue ahead of the model
    pub prefetch_batches: usize,
    /// Seeds the split and the per-epoch shuffle
    pub seed: u64,
    pub weight_decay: Option<f64>,
    pub scheduler: SchedulerType,
    /// Checkpoint file stem inside `output_dir`
    pub checkpoint_name: String,
    /// Draw per-phase progress bars
    pub show_progress: bool,
    pub model: ClassifierConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            num_epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            train_ratio: DEFAULT_TRAIN_RATIO,
            image_size: DEFAULT_IMAGE_SIZE,
            num_workers: DEFAULT_NUM_WORKERS,
            prefetch_batches: 2,
            seed: 42,
            weight_decay: None,
            scheduler: SchedulerType::default(),
            checkpoint_name: "best_model".to_string(),
            show_progress: true,
            model: ClassifierConfig::new(),
        }
    }
}

impl TrainingConfig {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(data_dir: P, output_dir: Q) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EquiVisionError::Config(msg.to_string()));

        if self.num_epochs == 0 {
            return fail("num_epochs must be > 0");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be > 0");
        }
        if !(self.learning_rate > 0.0) {
            return fail("learning_rate must be > 0");
        }
        if !(self.train_ratio > 0.0 && self.train_ratio <= 1.0) {
            return fail("train_ratio must be in (0, 1]");
        }
        if self.image_size < 16 {
            return fail("image_size must be at least 16");
        }
        if self.checkpoint_name.is_empty() {
            return fail("checkpoint_name must not be empty");
        }
        Ok(())
    }

    /// Adam, with weight decay when configured
    pub fn optimizer(&self) -> AdamConfig {
        AdamConfig::new().with_weight_decay(self.weight_decay.map(|wd| WeightDecayConfig::new(wd as f32)))
    }
}
