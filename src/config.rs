use std::path::PathBuf;

use crate::adaptive::config::AdaptiveConfig;

pub const DEFAULT_DATABASE_PATH: &str = "./adaptive_tutor.db";
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const LOG_FILE_PREFIX: &str = "adaptive-tutor.log";

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file, or `:memory:`.
    pub database_path: String,
    pub logging: LogSettings,
    pub adaptive: AdaptiveConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive for every layer.
    pub level: String,
    /// Daily JSON log files; `None` logs to stdout only.
    pub file: Option<FileLogSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogSettings {
    pub dir: PathBuf,
    pub prefix: String,
}

impl LogSettings {
    fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|value| is_enabled(&value))
            .unwrap_or(false);
        let file = enabled.then(|| FileLogSettings {
            dir: std::env::var("LOG_DIR")
                .unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string())
                .into(),
            prefix: LOG_FILE_PREFIX.to_string(),
        });
        Self { level, file }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

        let mut adaptive = AdaptiveConfig::default();
        if let Some(alpha) = env_f64("ADAPTIVE_PRIOR_ALPHA").filter(|v| *v > 0.0) {
            adaptive.prior.alpha = alpha;
        }
        if let Some(beta) = env_f64("ADAPTIVE_PRIOR_BETA").filter(|v| *v > 0.0) {
            adaptive.prior.beta = beta;
        }
        if let Some(rate) = env_f64("ADAPTIVE_FORGETTING_RATE").filter(|v| *v >= 0.0) {
            adaptive.prior.forgetting_rate = rate;
        }
        if let Some(rate) = env_f64("ADAPTIVE_LEARNING_RATE") {
            adaptive.prior.learning_rate = rate;
        }
        if let Some(threshold) = env_f64("ADAPTIVE_MASTERY_THRESHOLD").filter(is_probability) {
            adaptive.mastery.threshold = threshold;
        }
        if let Some(threshold) = env_f64("ADAPTIVE_SKIP_THRESHOLD").filter(is_probability) {
            adaptive.policy.skip_ability = threshold;
        }

        Self {
            database_path,
            logging: LogSettings::from_env(),
            adaptive,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == ":memory:"
    }
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn is_enabled(flag: &str) -> bool {
    matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn is_probability(value: &f64) -> bool {
    (0.0..=1.0).contains(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_filter() {
        assert!(is_probability(&0.85));
        assert!(!is_probability(&1.5));
        assert!(!is_probability(&-0.1));
    }

    #[test]
    fn test_file_log_flag() {
        assert!(is_enabled("true"));
        assert!(is_enabled(" 1 "));
        assert!(is_enabled("ON"));
        assert!(!is_enabled("false"));
        assert!(!is_enabled(""));
    }

    #[test]
    fn test_default_logging_is_stdout_only() {
        let settings = LogSettings::default();
        assert_eq!(settings.level, "info");
        assert!(settings.file.is_none());
    }
}
