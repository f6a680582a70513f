use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_import::Sniffer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Import tuning, read from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Rows categorised and persisted together.
    pub batch_size: usize,
    /// Job progress is also written every this many row errors.
    pub progress_error_interval: usize,
    pub workers: usize,
    pub channel_capacity: usize,
    pub fuzzy_threshold: f64,
    /// Minimum dialect confidence for `analyze` to report a hands-off import.
    pub auto_import_confidence: f64,
    pub insights_timeout_secs: u64,
    pub max_sniff_lines: usize,
    pub sample_rows: usize,
    /// Used only when neither the request, the account nor the file names a
    /// currency.
    pub default_currency: Option<String>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            progress_error_interval: 500,
            workers: default_workers(),
            channel_capacity: 1024,
            fuzzy_threshold: 80.0,
            auto_import_confidence: 0.6,
            insights_timeout_secs: 10,
            max_sniff_lines: 20,
            sample_rows: 10,
            default_currency: None,
        }
    }
}

impl ImportSettings {
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: ImportSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("progress_error_interval", self.progress_error_interval),
            ("workers", self.workers),
            ("channel_capacity", self.channel_capacity),
            ("max_sniff_lines", self.max_sniff_lines),
        ] {
            if value == 0 {
                return Err(SettingsError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if !(0.0..=100.0).contains(&self.fuzzy_threshold) {
            return Err(SettingsError::Invalid(
                "fuzzy_threshold must be between 0 and 100".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.auto_import_confidence) {
            return Err(SettingsError::Invalid(
                "auto_import_confidence must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }

    pub fn sniffer(&self) -> Sniffer {
        Sniffer::new(self.max_sniff_lines, self.sample_rows)
    }

    pub fn insights_timeout(&self) -> Duration {
        Duration::from_secs(self.insights_timeout_secs)
    }
}
