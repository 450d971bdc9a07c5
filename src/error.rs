// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

/// Errors surfaced by the sensor runtime.
///
/// Per-packet drops and capacity warnings are *not* represented here: those
/// are soft conditions handled with `Option`/`bool` returns and a `tracing`
/// log line, never a propagated error.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("startup error: {0}")]
    Startup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("analyzer '{name}': {reason}")]
    Analyzer { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SensorError>;
