//! Decoupled logging pipeline for monitoring sessions.
//!
//! All `log::*` macros end up here once the collector is installed as the
//! global logger. Lines are persisted to disk by a background thread and
//! offered to a live view without ever blocking the caller.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / log::info!(target: "device", ..)
//!     |
//! [LogCollector] (non-blocking)
//!     | (crossbeam unbounded channel)
//!     v
//! [Disk persister thread] ──try_send──> live view (tokio mpsc)
//!     |
//! logs/full/<ts>_full.log      every line
//! logs/device/<ts>_device.log  raw device status lines only
//! ```
//!
//! # Key Properties
//!
//! - **Guaranteed Persistence**: a full or closed live-view channel never loses the disk copy
//! - **Session Files**: `start_new_session()` redirects output to dedicated files
//! - **Flush Barrier**: `wait_for_empty()` returns once everything sent before it is on disk

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Log target used for raw lines read from the device status stream
pub const DEVICE_TARGET: &str = "device";

enum LogMessage {
    Line(LogLine),
    Flush(tokio::sync::oneshot::Sender<()>),
}

/// Which files a line is persisted to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// Application log, written to `full/`
    Full,
    /// Raw device line, written to `device/` and `full/`
    Device,
}

impl LogKind {
    fn dir_name(&self) -> &'static str {
        match self {
            LogKind::Full => "full",
            LogKind::Device => "device",
        }
    }
}

/// Session file paths with a generation counter so the writer thread can
/// notice a switch and drop its cached handles.
#[derive(Clone, Debug, Default)]
struct LogSession {
    paths: HashMap<LogKind, PathBuf>,
    generation: u64,
}

/// Get the global logs path relative to the current working directory: ./logs
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to get current working directory: {}", e))?;
    Ok(cwd.join("logs"))
}

pub fn ensure_logs_dir_exists(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create logs directory: {}", e))
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LogKind,
    /// Wall-clock time the line was created, `HH:MM:SS.mmm`
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            kind: LogKind::Full,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn device(message: String) -> Self {
        LogLine {
            kind: LogKind::Device,
            ..LogLine::new(message)
        }
    }
}

/// Unified logger that handles disk and live-view dispatch
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    session: Arc<Mutex<LogSession>>,
}

impl LogCollector {
    /// Create the log directories and start the background writer.
    pub fn new(log_dir: PathBuf, ui_tx: tokio::sync::mpsc::Sender<LogLine>) -> Result<Self, String> {
        for kind in [LogKind::Full, LogKind::Device] {
            let dir = log_dir.join(kind.dir_name());
            std::fs::create_dir_all(&dir)
                .map_err(|e| format!("Failed to create {} log dir: {}", kind.dir_name(), e))?;
        }

        let (tx, rx) = unbounded::<LogMessage>();
        let session = Arc::new(Mutex::new(LogSession::default()));
        let writer_session = Arc::clone(&session);
        let writer_dir = log_dir.clone();

        // OS thread rather than a tokio task: logging must work from any
        // thread, including the monitor driver and tail readers.
        std::thread::Builder::new()
            .name("log-persister".to_string())
            .spawn(move || {
                let mut writer = DiskWriter::new(writer_dir, writer_session);
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            writer.write(&line);
                            // Disk first; the live view may drop lines
                            let _ = ui_tx.try_send(line);
                        }
                        LogMessage::Flush(done) => {
                            writer.flush();
                            let _ = done.send(());
                        }
                    }
                }
                writer.flush();
            })
            .map_err(|e| format!("Failed to spawn log writer: {}", e))?;

        Ok(LogCollector {
            tx,
            log_dir,
            session,
        })
    }

    /// Route subsequent output to `full/<name>` and `device/<name>`.
    pub fn start_new_session(&self, name: &str) -> Result<PathBuf, String> {
        let full_path = self.log_dir.join(LogKind::Full.dir_name()).join(name);
        let device_path = self.log_dir.join(LogKind::Device.dir_name()).join(name);

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.paths.insert(LogKind::Full, full_path.clone());
        session.paths.insert(LogKind::Device, device_path);
        session.generation = session.generation.wrapping_add(1);
        Ok(full_path)
    }

    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.paths.get(&LogKind::Full).cloned())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Queue a line. Never blocks and never fails.
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    pub fn log_device(&self, message: impl Into<String>) {
        self.log(LogLine::device(message.into()));
    }

    /// Wait until every line queued before this call is on disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.await
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.target() == DEVICE_TARGET {
            self.log_device(record.args().to_string());
        } else {
            self.log_str(format!("[{}] {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Writer-thread state: cached file handles per kind
struct DiskWriter {
    log_dir: PathBuf,
    session: Arc<Mutex<LogSession>>,
    generation: u64,
    handles: HashMap<LogKind, File>,
}

impl DiskWriter {
    fn new(log_dir: PathBuf, session: Arc<Mutex<LogSession>>) -> Self {
        DiskWriter {
            log_dir,
            session,
            generation: 0,
            handles: HashMap::new(),
        }
    }

    fn write(&mut self, line: &LogLine) {
        self.check_session();
        match line.kind {
            LogKind::Full => self.append(LogKind::Full, &format!("[{}] {}\n", line.timestamp, line.message)),
            LogKind::Device => {
                self.append(LogKind::Device, &format!("[{}] {}\n", line.timestamp, line.message));
                self.append(
                    LogKind::Full,
                    &format!("[{}] [{}] {}\n", line.timestamp, DEVICE_TARGET, line.message),
                );
            }
        }
    }

    fn check_session(&mut self) {
        if let Ok(session) = self.session.lock() {
            if session.generation != self.generation {
                self.generation = session.generation;
                self.handles.clear();
            }
        }
    }

    fn append(&mut self, kind: LogKind, text: &str) {
        if !self.handles.contains_key(&kind) {
            let path = self
                .session
                .lock()
                .ok()
                .and_then(|s| s.paths.get(&kind).cloned())
                .or_else(|| get_or_create_latest_log(&self.log_dir.join(kind.dir_name()), kind).ok());
            let Some(path) = path else {
                return;
            };
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    self.handles.insert(kind, file);
                }
                Err(e) => {
                    eprintln!("[Log] Failed to open {}: {}", path.display(), e);
                    return;
                }
            }
        }
        if let Some(file) = self.handles.get_mut(&kind) {
            let _ = file.write_all(text.as_bytes());
        }
    }

    fn flush(&mut self) {
        for file in self.handles.values_mut() {
            let _ = file.flush();
        }
    }
}

/// Get the latest log file in `dir`, or create a new timestamped one.
fn get_or_create_latest_log(dir: &Path, kind: LogKind) -> Result<PathBuf, String> {
    if let Ok(entries) = std::fs::read_dir(dir) {
        let latest = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "log"))
            .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));
        if let Some(entry) = latest {
            return Ok(entry.path());
        }
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.log", timestamp, kind.dir_name()));
    File::create(&path).map_err(|e| format!("Failed to create log file: {}", e))?;
    Ok(path)
}
