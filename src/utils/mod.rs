//! Utilities: error types, logging and evaluation metrics

use std::time::Duration;

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{EquiVisionError, Result};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, PhaseMetrics};

/// `42.3s`, `3m 07s` or `2h 05m`
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let whole = elapsed.as_secs();
    match whole {
        0..=59 => format!("{:.1}s", total),
        60..=3599 => format!("{}m {:02}s", whole / 60, whole % 60),
        _ => format!("{}h {:02}m", whole / 3600, (whole % 3600) / 60),
    }
}
