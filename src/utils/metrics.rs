//! Metrics Module
//!
//! Running loss/accuracy counters for a training or validation phase, and a
//! confusion matrix used by the `evaluate` command for per-breed accuracy.

use serde::{Deserialize, Serialize};

/// Accumulates `loss * batch_size` and correct predictions over one phase.
///
/// Reset at the start of every phase; `loss()` and `accuracy()` divide by the
/// number of samples actually seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub loss_sum: f64,
    pub correct: usize,
    pub samples: usize,
}

impl PhaseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one mini-batch whose mean loss is `batch_loss`
    pub fn update(&mut self, batch_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
    }

    /// Mean loss per sample, 0.0 for an empty phase
    pub fn loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    /// Fraction of correct predictions, 0.0 for an empty phase
    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as f64 / self.samples as f64
        }
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,

    /// Row = actual, column = predicted, row-major
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Add a single prediction; out-of-range indices are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Recall per class; `None` for classes with no samples
    pub fn per_class_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.num_classes)
            .map(|row| {
                let support: usize = (0..self.num_classes).map(|col| self.get(row, col)).sum();
                (support > 0).then(|| self.get(row, row) as f64 / support as f64)
            })
            .collect()
    }

    /// Render the matrix with class names as row labels
    pub fn display(&self, class_names: &[String]) -> String {
        let mut out = String::new();
        for row in 0..self.num_classes {
            let name = class_names.get(row).map(String::as_str).unwrap_or("?");
            let cells: Vec<String> = (0..self.num_classes)
                .map(|col| format!("{:>5}", self.get(row, col)))
                .collect();
            out.push_str(&format!("{:>16} |{}\n", name, cells.join("")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_metrics_weights_loss_by_batch() {
        let mut m = PhaseMetrics::new();
        m.update(1.0, 3, 4);
        m.update(0.5, 1, 2);
        assert_eq!(m.samples, 6);
        assert!((m.loss() - 5.0 / 6.0).abs() < 1e-9);
        assert!((m.accuracy() - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_phase_is_zero() {
        let m = PhaseMetrics::new();
        assert_eq!(m.loss(), 0.0);
        assert_eq!(m.accuracy(), 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(5, 0);
        assert_eq!(cm.total(), 3);
        assert_eq!(cm.correct(), 2);
        assert_eq!(cm.per_class_accuracy(), vec![Some(0.5), Some(1.0)]);
    }

    #[test]
    fn test_per_class_without_support() {
        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 0);
        assert_eq!(cm.per_class_accuracy()[2], None);
    }
}
