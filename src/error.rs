//! Unified error type hierarchy for Stressmon
//!
//! Provides structured error handling with TailError, ConfigError, ExportError
//! and MonitorError.
//!
//! Only transport failures are surfaced to the operator. Irregular device output
//! (unknown lines, duplicate fields, missing end markers) is absorbed by the
//! segmenter and never becomes an error value.

use std::io;
use thiserror::Error;

/// Transport errors raised by a tail source. Fatal to the current tail session.
#[derive(Error, Debug)]
pub enum TailError {
    #[error("IO error while tailing: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to spawn '{cmd}': {reason}")]
    Spawn { cmd: String, reason: String },

    #[error("Tail process exited: {0}")]
    ProcessExited(String),

    #[error("Tail source disconnected")]
    Disconnected,
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid pattern for '{field}': {reason}")]
    InvalidPattern { field: String, reason: String },

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// CSV export errors.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No data to export")]
    NoData,

    #[error("IO error during export: {0}")]
    Io(#[from] io::Error),
}

/// Session-level errors reported by the monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TailError),

    #[error("No test is running")]
    NotRunning,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MonitorError {
    /// Get a user-facing error message suitable for the status bar
    pub fn user_message(&self) -> String {
        match self {
            MonitorError::Transport(TailError::ProcessExited(status)) => {
                format!("Connection lost: tail process exited ({})", status)
            }
            MonitorError::Transport(TailError::Disconnected) => "Connection lost".to_string(),
            MonitorError::Transport(e) => format!("Stopped: {}", e),
            MonitorError::NotRunning => "Stopped".to_string(),
            MonitorError::Config(e) => format!("Settings error: {}", e),
        }
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
