//! Error Handling Module
//!
//! Defines the error type shared by the dataset, model and training layers.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for EquiVision operations
#[derive(Error, Debug)]
pub enum EquiVisionError {
    /// The `labels.json` manifest is absent from the data directory
    #[error("Label manifest not found: {0}")]
    MissingManifest(PathBuf),

    /// The manifest exists but is not a JSON object of strings
    #[error("Invalid label manifest '{0}': {1}")]
    InvalidManifest(PathBuf, String),

    /// An image could not be opened or decoded
    #[error("Failed to decode image at '{0}': {1}")]
    Decode(PathBuf, String),

    /// Checkpoint head does not match the requested class count
    #[error("Shape mismatch: checkpoint head has {found} classes, expected {expected}")]
    ShapeMismatch { expected: usize, found: usize },

    /// Image buffer length does not match the model input
    #[error("Input shape: expected {expected} values, got {found}")]
    InputShape { expected: usize, found: usize },

    /// Checkpoint could not be written or read
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Pretrained backbone weights could not be imported
    #[error("Pretrained weights error: {0}")]
    PretrainedWeights(String),

    /// A partition that must contain samples is empty
    #[error("Empty partition: {0}")]
    EmptyPartition(String),

    /// The training transform was bound to the validation partition
    #[error("Training augmentation cannot be bound to the validation partition")]
    AugmentationLeak,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EquiVisionError {
    fn from(err: serde_json::Error) -> Self {
        EquiVisionError::Serialization(err.to_string())
    }
}

/// Convenience Result type for EquiVision operations
pub type Result<T> = std::result::Result<T, EquiVisionError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| EquiVisionError::Config(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| EquiVisionError::Config(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_shape_display() {
        let err = EquiVisionError::InputShape {
            expected: 3072,
            found: 10,
        };
        assert_eq!(err.to_string(), "Input shape: expected 3072 values, got 10");
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = EquiVisionError::ShapeMismatch {
            expected: 3,
            found: 5,
        };
        assert_eq!(
            format!("{}", err),
            "Shape mismatch: checkpoint head has 5 classes, expected 3"
        );
    }

    #[test]
    fn test_decode_error_names_path() {
        let err = EquiVisionError::Decode(PathBuf::from("/data/01_003.png"), "bad header".into());
        assert!(format!("{}", err).contains("01_003.png"));
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: EquiVisionError = parse.unwrap_err().into();
        assert!(matches!(err, EquiVisionError::Serialization(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result.context("reading config").unwrap_err();
        assert!(format!("{}", err).contains("reading config"));
    }
}
