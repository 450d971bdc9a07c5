// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Result, SensorError};

/// Top-level configuration loaded from a TOML file.
///
/// This is a structured re-expression of the flat `key=value` configuration
/// format described for the sensor: `logging`/`log`/`interface`/
/// `flush_interval_secs`/`modules` become top-level fields here, and each
/// `modules` entry becomes one element of `analyzers`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_logging")]
    pub logging: bool,
    pub log: Option<PathBuf>,
    pub interface: String,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(rename = "analyzers")]
    pub analyzers: Vec<AnalyzerConfig>,
}

fn default_logging() -> bool {
    true
}
fn default_flush_interval() -> u64 {
    10
}

/// Per-analyzer configuration. Every analyzer reads `timeout_secs`,
/// `max_sessions`, `data` and `dependencies`; the remaining fields are only
/// meaningful to the analyzers that use them (SMTP alerting, PPS).
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    pub name: String,
    pub filter: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    pub data: Option<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<String>,

    // SMTP alert keys, used by analyzers that raise alerts (BitTorrent, PPS).
    pub smtp_server: Option<String>,
    #[serde(default)]
    pub smtp_auth: bool,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,

    // PPS-specific keys.
    pub threshold: Option<u64>,
    pub mail_interval_secs: Option<u64>,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub num_packets: Option<u32>,
}

fn default_timeout() -> u32 {
    300
}
fn default_max_sessions() -> usize {
    8192
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SensorError::Config(format!("cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| SensorError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(SensorError::Config("interface must not be empty".into()));
        }
        if self.flush_interval_secs == 0 {
            return Err(SensorError::Config("flush_interval_secs must be > 0".into()));
        }
        if self.analyzers.is_empty() {
            return Err(SensorError::Config("no analyzers configured".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for analyzer in &self.analyzers {
            if !seen.insert(analyzer.name.as_str()) {
                return Err(SensorError::Config(format!(
                    "duplicate analyzer name '{}'",
                    analyzer.name
                )));
            }
            if analyzer.max_sessions == 0 {
                return Err(SensorError::Config(format!(
                    "analyzer '{}': max_sessions must be > 0",
                    analyzer.name
                )));
            }
            for dep in &analyzer.dependencies {
                if dep != "packet" && dep == &analyzer.name {
                    return Err(SensorError::Config(format!(
                        "analyzer '{}' depends on itself",
                        analyzer.name
                    )));
                }
            }
        }
        Ok(())
    }
}
