//! Stress-test monitor backend
//!
//! Follows the human-readable status report of a device stress tool, turns
//! it into per-subsystem utilization samples and plays them back at a steady
//! cadence into time series.
//!
//! The system is organized into functional modules:
//! - **error**: Error type hierarchy
//! - **models**: Series keys, samples and session state
//! - **config**: Settings, report format and JSON persistence
//! - **log_collector**: Disk-backed logging sink for the `log` facade
//! - **monitor**: Tail sources, segmentation, pacing, storage and export

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;

// Robust, decoupled logging system
pub mod log_collector;

// Tail/segment/pace pipeline
pub mod monitor;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, ExportError, MonitorError, Result, TailError};

pub use models::{PartialSample, SamplePoint, SeriesKey, SessionState, Subsystem};

pub use config::{MonitorSettings, ReportFormat, SettingsManager};

pub use monitor::{
    LocalFileTail, MonitorDriver, MonitorEvent, MonitorSession, RemoteTail, TailSource,
    TimeSeriesStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
