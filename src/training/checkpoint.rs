//! Best-model checkpoints
//!
//! A checkpoint is the weight file `<name>.mpk` plus a JSON sidecar
//! `<name>.json` holding what is needed to rebuild the model and the exact
//! validation split. Both are written to a temporary name first and renamed
//! into place, so an interrupted run leaves the previous checkpoint intact.

use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{ClassifierConfig, HorseClassifier, ModelArchitecture};
use crate::utils::error::{EquiVisionError, Result};

/// File extension the checkpoint recorder writes
pub const WEIGHTS_EXTENSION: &str = "mpk";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Zero-based epoch that produced these weights
    pub epoch: usize,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub learning_rate: f64,
    pub timestamp: String,
    pub num_classes: usize,
    /// Class vocabulary in index order
    pub classes: Vec<String>,
    pub architecture: ModelArchitecture,
    pub dropout: f64,
    pub image_size: u32,
    pub seed: u64,
    pub train_ratio: f64,
}

impl CheckpointMetadata {
    /// Config that rebuilds the checkpointed model's layout
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig::new()
            .with_architecture(self.architecture)
            .with_dropout(Some(self.dropout))
            .with_pretrained(false)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| EquiVisionError::Checkpoint(format!("{:?}: {}", path, e)))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Sidecar path for a weights path (`best_model.mpk` -> `best_model.json`)
pub fn metadata_path(weights: &Path) -> PathBuf {
    weights.with_extension("json")
}

/// Writes the best-model checkpoint and counts how often it did
#[derive(Debug)]
pub struct CheckpointWriter {
    dir: PathBuf,
    name: String,
    writes: usize,
}

impl CheckpointWriter {
    pub fn new<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            name: name.to_string(),
            writes: 0,
        })
    }

    /// Final location of the weight file
    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, WEIGHTS_EXTENSION))
    }

    pub fn metadata_path(&self) -> PathBuf {
        metadata_path(&self.weights_path())
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn write<B: Backend>(&mut self, model: &HorseClassifier<B>, metadata: &CheckpointMetadata) -> Result<()> {
        let partial = self.dir.join(format!("{}-partial", self.name));
        let partial_weights = partial.with_extension(WEIGHTS_EXTENSION);
        let partial_meta = partial.with_extension("json");

        model.save(&partial_weights)?;
        metadata.save(&partial_meta)?;

        fs::rename(&partial_weights, self.weights_path())?;
        fs::rename(&partial_meta, self.metadata_path())?;

        self.writes += 1;
        info!(
            "Checkpoint saved to {:?} (epoch {}, val acc {:.4})",
            self.weights_path(),
            metadata.epoch + 1,
            metadata.val_accuracy
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    fn metadata() -> CheckpointMetadata {
        CheckpointMetadata {
            epoch: 2,
            val_accuracy: 0.75,
            val_loss: 0.6,
            learning_rate: 1e-3,
            timestamp: chrono::Utc::now().to_rfc3339(),
            num_classes: 2,
            classes: vec!["Arabian".into(), "Friesian".into()],
            architecture: ModelArchitecture::ResNet18,
            dropout: 0.0,
            image_size: 32,
            seed: 42,
            train_ratio: 0.8,
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        metadata().save(&path).unwrap();
        assert_eq!(CheckpointMetadata::load(&path).unwrap(), metadata());
    }

    #[test]
    fn test_write_places_both_files() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let meta = metadata();
        let model = HorseClassifier::<NdArray<f32>>::new(&meta.classifier_config(), 2, &device).unwrap();

        let mut writer = CheckpointWriter::new(dir.path().join("out"), "best_model").unwrap();
        writer.write(&model, &meta).unwrap();
        writer.write(&model, &meta).unwrap();

        assert_eq!(writer.writes(), 2);
        assert!(writer.weights_path().ends_with("best_model.mpk"));
        assert!(writer.weights_path().is_file());
        assert!(writer.metadata_path().is_file());
        assert!(!dir.path().join("out/best_model-partial.mpk").exists());
    }

    #[test]
    fn test_missing_metadata_is_checkpoint_error() {
        let err = CheckpointMetadata::load(Path::new("/nonexistent/best_model.json")).unwrap_err();
        assert!(matches!(err, EquiVisionError::Checkpoint(_)));
    }

    #[test]
    fn test_metadata_path() {
        assert_eq!(
            metadata_path(Path::new("/runs/best_model.mpk")),
            PathBuf::from("/runs/best_model.json")
        );
    }
}
