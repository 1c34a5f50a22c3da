//! Transfer-learning classifier
//!
//! A pretrained backbone (EfficientNet-B0 by default, ResNet-18 optionally)
//! feeds a linear head sized to the breed vocabulary.

pub mod classifier;
pub mod config;
pub mod efficientnet;
pub mod pretrained;
pub mod resnet;

pub use classifier::{Backbone, CheckpointRecorder, HorseClassifier};
pub use config::{ClassifierConfig, ModelArchitecture};
