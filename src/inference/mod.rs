//! Inference with trained checkpoints
//!
//! [`load_model`] restores a checkpoint for a known class count;
//! [`load_checkpoint`] also returns the sidecar metadata (class names, image
//! size) that [`Predictor`] needs.

pub mod predictor;

use std::path::Path;

use burn::tensor::backend::Backend;
use tracing::{info, warn};

use crate::model::HorseClassifier;
use crate::training::checkpoint::{metadata_path, CheckpointMetadata};
use crate::utils::error::Result;

pub use predictor::{PredictionResult, Predictor};

/// A restored model plus what it was trained with
#[derive(Debug)]
pub struct LoadedModel<B: Backend> {
    pub model: HorseClassifier<B>,
    pub metadata: CheckpointMetadata,
}

/// Load `weights` (a `.mpk` checkpoint) for `num_classes` breeds in inference mode.
///
/// The backbone layout comes from the `.json` sidecar when present, otherwise
/// it is detected from the checkpoint. A checkpoint whose head width is not
/// `num_classes` is rejected with `ShapeMismatch`; one whose backbone differs
/// from the sidecar with `Checkpoint`.
pub fn load_model<B: Backend>(weights: &Path, num_classes: usize, device: &B::Device) -> Result<HorseClassifier<B>> {
    let sidecar = metadata_path(weights);
    if sidecar.is_file() {
        let config = CheckpointMetadata::load(&sidecar)?.classifier_config();
        HorseClassifier::load(weights, &config, num_classes, device)
    } else {
        warn!("No metadata next to {:?}; detecting the backbone from the weights", weights);
        HorseClassifier::load_detected(weights, num_classes, device)
    }
}

/// Load `weights` together with its sidecar; class count and names come from the sidecar
pub fn load_checkpoint<B: Backend>(weights: &Path, device: &B::Device) -> Result<LoadedModel<B>> {
    let metadata = CheckpointMetadata::load(&metadata_path(weights))?;
    let model = HorseClassifier::load(weights, &metadata.classifier_config(), metadata.num_classes, device)?;

    info!(
        "Loaded {} checkpoint from {:?} (epoch {}, val acc {:.4})",
        metadata.architecture,
        weights,
        metadata.epoch + 1,
        metadata.val_accuracy
    );

    Ok(LoadedModel { model, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassifierConfig, ModelArchitecture};
    use crate::training::checkpoint::CheckpointWriter;
    use crate::utils::error::EquiVisionError;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn metadata(num_classes: usize) -> CheckpointMetadata {
        CheckpointMetadata {
            epoch: 0,
            val_accuracy: 0.5,
            val_loss: 0.7,
            learning_rate: 1e-3,
            timestamp: chrono::Utc::now().to_rfc3339(),
            num_classes,
            classes: (0..num_classes).map(|i| format!("breed-{}", i)).collect(),
            architecture: ModelArchitecture::ResNet18,
            dropout: 0.0,
            image_size: 32,
            seed: 1,
            train_ratio: 0.8,
        }
    }

    #[test]
    fn test_load_uses_sidecar() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_architecture(ModelArchitecture::ResNet18)
            .with_pretrained(false);
        let model = HorseClassifier::<TestBackend>::new(&config, 3, &device).unwrap();

        let mut writer = CheckpointWriter::new(dir.path(), "best_model").unwrap();
        writer.write(&model, &metadata(3)).unwrap();

        let loaded = load_checkpoint::<TestBackend>(&writer.weights_path(), &device).unwrap();
        assert_eq!(loaded.model.num_classes(), 3);
        assert_eq!(loaded.metadata.classes.len(), 3);

        let predictor = Predictor::from_checkpoint(loaded, device);
        assert_eq!(predictor.classes()[2], "breed-2");
    }

    #[test]
    fn test_sidecar_class_count_must_match_weights() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_architecture(ModelArchitecture::ResNet18)
            .with_pretrained(false);
        let model = HorseClassifier::<TestBackend>::new(&config, 3, &device).unwrap();

        let mut writer = CheckpointWriter::new(dir.path(), "best_model").unwrap();
        writer.write(&model, &metadata(4)).unwrap();

        let err = load_checkpoint::<TestBackend>(&writer.weights_path(), &device).unwrap_err();
        assert!(matches!(err, EquiVisionError::ShapeMismatch { expected: 4, found: 3 }));
    }

    #[test]
    fn test_missing_checkpoint() {
        let device = Default::default();
        let err = load_checkpoint::<TestBackend>(Path::new("/nonexistent/best_model.mpk"), &device).unwrap_err();
        assert!(matches!(err, EquiVisionError::Checkpoint(_)));
        let err = load_model::<TestBackend>(Path::new("/nonexistent/best_model.mpk"), 2, &device).unwrap_err();
        assert!(matches!(err, EquiVisionError::Checkpoint(_)));
    }

    #[test]
    fn test_load_model_by_class_count() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_architecture(ModelArchitecture::ResNet18)
            .with_pretrained(false);
        let model = HorseClassifier::<TestBackend>::new(&config, 3, &device).unwrap();

        let mut writer = CheckpointWriter::new(dir.path(), "best_model").unwrap();
        writer.write(&model, &metadata(3)).unwrap();

        let loaded = load_model::<TestBackend>(&writer.weights_path(), 3, &device).unwrap();
        assert_eq!(loaded.num_classes(), 3);
        assert_eq!(loaded.feature_width(), 512);

        let err = load_model::<TestBackend>(&writer.weights_path(), 5, &device).unwrap_err();
        assert!(matches!(err, EquiVisionError::ShapeMismatch { expected: 5, found: 3 }));
    }

    #[test]
    fn test_load_model_without_sidecar_detects_backbone() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_architecture(ModelArchitecture::ResNet18)
            .with_pretrained(false);
        let weights = dir.path().join("resnet_only");
        HorseClassifier::<TestBackend>::new(&config, 2, &device)
            .unwrap()
            .save(&weights)
            .unwrap();
        let weights = weights.with_extension("mpk");
        assert!(!metadata_path(&weights).exists());

        let loaded = load_model::<TestBackend>(&weights, 2, &device).unwrap();
        assert_eq!(loaded.architecture(), ModelArchitecture::ResNet18);
        assert_eq!(loaded.feature_width(), 512);
    }

    #[test]
    fn test_sidecar_with_wrong_backbone_is_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_architecture(ModelArchitecture::ResNet18)
            .with_pretrained(false);
        let model = HorseClassifier::<TestBackend>::new(&config, 3, &device).unwrap();

        let mut meta = metadata(3);
        meta.architecture = ModelArchitecture::EfficientNetB0;
        let mut writer = CheckpointWriter::new(dir.path(), "best_model").unwrap();
        writer.write(&model, &meta).unwrap();

        let err = load_model::<TestBackend>(&writer.weights_path(), 3, &device).unwrap_err();
        assert!(matches!(err, EquiVisionError::Checkpoint(_)));
        let err = load_checkpoint::<TestBackend>(&writer.weights_path(), &device).unwrap_err();
        assert!(matches!(err, EquiVisionError::Checkpoint(_)));
    }
}
