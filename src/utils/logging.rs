//! Logging Module
//!
//! Structured logging on top of the `tracing` crate, plus a small logger that
//! reports training progress in a consistent format.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::utils::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose config with module paths and thread ids (useful to watch the loader pool)
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::default()
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name; unknown names fall back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Filter from `RUST_LOG` directives, or `config.level` when unset or unparsable
pub fn build_filter(config: &LogConfig, directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| {
            EnvFilter::default().add_directive(LevelFilter::from_level(config.level.to_tracing_level()).into())
        })
}

/// Install the global tracing subscriber; `RUST_LOG` overrides the configured level
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(build_filter(config, directives.as_deref()))
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Training progress logger
///
/// Phase lines follow the `{phase} Loss: {loss:.4} Acc: {acc:.4}` layout so runs
/// can be compared line by line.
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (zero-based)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::info!("Epoch {}/{}", epoch + 1, self.total_epochs);
        tracing::info!("{}", "-".repeat(10));
    }

    /// Log the aggregate result of one phase
    pub fn log_phase(&self, phase: &str, loss: f64, accuracy: f64) {
        tracing::info!("{} Loss: {:.4} Acc: {:.4}", phase, loss, accuracy);
    }

    /// Log end of an epoch
    pub fn end_epoch(&self, learning_rate: f64) {
        let remaining = self.total_epochs.saturating_sub(self.epoch + 1) as u32;
        let eta = self.training_start.elapsed() / (self.epoch as u32 + 1) * remaining;

        tracing::info!(
            "Epoch {}/{} done in {} | next LR: {:.6} | ETA: {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(self.epoch_start.elapsed()),
            learning_rate,
            format_duration(eta)
        );
    }

    /// Log a new best model
    pub fn log_new_best(&self, accuracy: f64) {
        tracing::info!("New best model! Val Acc: {:.4}", accuracy);
    }

    /// Log training completion
    pub fn log_complete(&self, best_accuracy: f64) {
        tracing::info!(
            "Training complete in {}",
            format_duration(self.training_start.elapsed())
        );
        tracing::info!("Best val Acc: {:.4}", best_accuracy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_prefers_env_directives() {
        let config = LogConfig::quiet();
        assert_eq!(build_filter(&config, None).max_level_hint(), Some(LevelFilter::ERROR));
        assert_eq!(
            build_filter(&config, Some("debug")).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        // unparsable directives fall back to the configured level
        assert_eq!(
            build_filter(&config, Some("equivision=loud")).max_level_hint(),
            Some(LevelFilter::ERROR)
        );
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_quiet_config() {
        let config = LogConfig::quiet();
        assert_eq!(config.level, LogLevel::Error);
        assert!(!config.include_target);
    }

    #[test]
    fn test_training_logger_tracks_epoch() {
        let mut logger = TrainingLogger::new(3);
        logger.start_epoch(1);
        assert_eq!(logger.epoch, 1);
        logger.end_epoch(0.001);
    }
}
