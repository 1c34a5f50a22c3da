//! Classifier configuration

use burn::config::Config;
use serde::{Deserialize, Serialize};

/// Backbone architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelArchitecture {
    EfficientNetB0,
    ResNet18,
}

impl ModelArchitecture {
    /// Width of the pooled feature vector fed to the head
    pub fn feature_width(&self) -> usize {
        match self {
            ModelArchitecture::EfficientNetB0 => 1280,
            ModelArchitecture::ResNet18 => 512,
        }
    }

    /// Dropout in front of the head in the reference torchvision layouts
    pub fn default_dropout(&self) -> f64 {
        match self {
            ModelArchitecture::EfficientNetB0 => 0.2,
            ModelArchitecture::ResNet18 => 0.0,
        }
    }

    /// Backbone whose pooled features are `width` wide
    pub fn from_feature_width(width: usize) -> Option<Self> {
        [ModelArchitecture::EfficientNetB0, ModelArchitecture::ResNet18]
            .into_iter()
            .find(|arch| arch.feature_width() == width)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "efficientnetb0" | "efficientnet" => Some(ModelArchitecture::EfficientNetB0),
            "resnet18" | "resnet" => Some(ModelArchitecture::ResNet18),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelArchitecture::EfficientNetB0 => write!(f, "efficientnet-b0"),
            ModelArchitecture::ResNet18 => write!(f, "resnet18"),
        }
    }
}

/// How to build a [`HorseClassifier`](super::HorseClassifier)
#[derive(Config, Debug, PartialEq)]
pub struct ClassifierConfig {
    #[config(default = "ModelArchitecture::EfficientNetB0")]
    pub architecture: ModelArchitecture,

    /// Start the backbone from ImageNet weights
    #[config(default = true)]
    pub pretrained: bool,

    /// torchvision `.pth` state dict to import; the cached torchvision download when unset
    pub pretrained_weights: Option<String>,

    /// Exclude the backbone from gradient updates
    #[config(default = false)]
    pub freeze_backbone: bool,

    /// Dropout before the head; architecture default when unset
    pub dropout: Option<f64>,
}

impl ClassifierConfig {
    pub fn effective_dropout(&self) -> f64 {
        self.dropout
            .unwrap_or_else(|| self.architecture.default_dropout())
    }
}
