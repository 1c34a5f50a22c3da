//! Single-image prediction with a trained checkpoint

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::provider::decode_image;
use crate::dataset::Transform;
use crate::inference::LoadedModel;
use crate::model::HorseClassifier;
use crate::utils::error::{EquiVisionError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub image_path: Option<PathBuf>,
    pub predicted_class: usize,
    pub class_name: String,
    /// Softmax probability of the predicted class
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    /// Highest-probability classes, best first
    pub top_k: Vec<(usize, String, f32)>,
    pub inference_time_ms: f64,
}

impl PredictionResult {
    pub fn new(probabilities: Vec<f32>, classes: &[String], k: usize, inference_time: Duration) -> Self {
        let name = |idx: usize| classes.get(idx).cloned().unwrap_or_else(|| format!("class {}", idx));

        let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (predicted_class, confidence) = indexed.first().copied().unwrap_or((0, 0.0));
        let top_k = indexed
            .iter()
            .take(k)
            .map(|&(idx, prob)| (idx, name(idx), prob))
            .collect();

        Self {
            image_path: None,
            predicted_class,
            class_name: name(predicted_class),
            confidence,
            probabilities,
            top_k,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    pub fn display(&self) -> String {
        let mut output = String::new();

        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {:?}\n", path));
        }
        output.push_str(&format!("Prediction: {} (class {})\n", self.class_name, self.predicted_class));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str(&format!("\nTop-{} predictions:\n", self.top_k.len()));
        for (i, (idx, name, prob)) in self.top_k.iter().enumerate() {
            output.push_str(&format!("  {}. {} (class {}) - {:.2}%\n", i + 1, name, idx, prob * 100.0));
        }

        output
    }
}

/// Classifies images with an inference-mode model and the evaluation transform
pub struct Predictor<B: Backend> {
    model: HorseClassifier<B>,
    classes: Vec<String>,
    transform: Transform,
    device: B::Device,
    top_k: usize,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: HorseClassifier<B>, classes: Vec<String>, image_size: u32, device: B::Device) -> Self {
        Self {
            model,
            classes,
            transform: Transform::evaluation(image_size),
            device,
            top_k: 5,
        }
    }

    pub fn from_checkpoint(loaded: LoadedModel<B>, device: B::Device) -> Self {
        let LoadedModel { model, metadata } = loaded;
        Self::new(model, metadata.classes, metadata.image_size, device)
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Class probabilities for an already transformed `[3, size, size]` buffer
    pub fn predict_tensor(&self, image: Vec<f32>) -> Result<PredictionResult> {
        let size = self.transform.image_size() as usize;
        if image.len() != self.transform.output_len() {
            return Err(EquiVisionError::InputShape {
                expected: self.transform.output_len(),
                found: image.len(),
            });
        }

        let start = Instant::now();
        let input = Tensor::<B, 4>::from_floats(TensorData::new(image, [1, 3, size, size]), &self.device);
        let probabilities: Vec<f32> = self
            .model
            .predict(input)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| EquiVisionError::Serialization(format!("{:?}", e)))?;

        Ok(PredictionResult::new(probabilities, &self.classes, self.top_k, start.elapsed()))
    }

    pub fn predict_file(&self, path: &Path) -> Result<PredictionResult> {
        let image = decode_image(path)?;
        let mut result = self.predict_tensor(self.transform.apply(&image))?;
        result.image_path = Some(path.to_path_buf());
        Ok(result)
    }

    pub fn predict_batch(&self, paths: &[PathBuf]) -> Result<Vec<PredictionResult>> {
        paths.iter().map(|path| self.predict_file(path)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::catalog::tests::write_png;
    use crate::model::{ClassifierConfig, ModelArchitecture};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn classes() -> Vec<String> {
        vec!["Arabian".into(), "Friesian".into(), "Haflinger".into()]
    }

    fn predictor() -> Predictor<TestBackend> {
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_architecture(ModelArchitecture::ResNet18)
            .with_pretrained(false);
        let model = HorseClassifier::<TestBackend>::new(&config, 3, &device).unwrap();
        Predictor::new(model, classes(), 32, device)
    }

    #[test]
    fn test_result_ranks_probabilities() {
        let result = PredictionResult::new(vec![0.2, 0.7, 0.1], &classes(), 2, Duration::from_millis(3));
        assert_eq!(result.predicted_class, 1);
        assert_eq!(result.class_name, "Friesian");
        assert_eq!(result.top_k.len(), 2);
        assert_eq!(result.top_k[1].1, "Arabian");
        assert!(result.display().contains("Friesian"));
    }

    #[test]
    fn test_predict_file_sums_to_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("01_001.png");
        write_png(&path, 90);

        let result = predictor().predict_file(&path).unwrap();
        assert_eq!(result.probabilities.len(), 3);
        let total: f32 = result.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(result.image_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_wrong_buffer_length() {
        let err = predictor().predict_tensor(vec![0.0; 10]).unwrap_err();
        assert!(matches!(
            err,
            EquiVisionError::InputShape {
                expected: 3072,
                found: 10
            }
        ));
    }

    #[test]
    fn test_undecodable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("01_001.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(matches!(predictor().predict_file(&path), Err(EquiVisionError::Decode(..))));
    }
}
