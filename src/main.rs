use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use stressmon::config::loader::{get_global_settings_path, load_or_default, load_settings_from_file};
use stressmon::log_collector::{ensure_logs_dir_exists, get_global_logs_path, LogKind};
use stressmon::monitor::{
    export_csv_to_path, LoadScheduler, LocalFileTail, MonitorDriver, MonitorEvent, MonitorSession,
    MonitorSnapshot, RemoteTail, TailSource,
};
use stressmon::{ExportError, LogCollector, LogLine};

#[derive(Parser)]
#[command(name = "stressmon")]
#[command(about = "Live monitor for device stress test status reports")]
#[command(version = stressmon::VERSION)]
struct Cli {
    /// Tail a local status file
    #[arg(long, conflicts_with = "adb", required_unless_present = "adb")]
    file: Option<PathBuf>,

    /// Tail the status file on an Android device through adb
    #[arg(long)]
    adb: bool,

    /// adb device serial (overrides the settings file)
    #[arg(long, requires = "adb")]
    serial: Option<String>,

    /// Status file path on the device (overrides the settings file)
    #[arg(long, requires = "adb")]
    remote_path: Option<String>,

    /// Settings JSON (default: ~/.config/stressmon/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write all collected series to this CSV file on exit
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// JSON list of scheduled target changes
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// Log directory (default: ./logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Echo application log lines to stderr
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // =========================================================================
    // LOG COLLECTOR - MUST BE FIRST
    // =========================================================================
    let log_dir = match cli.log_dir.clone() {
        Some(dir) => dir,
        None => get_global_logs_path().map_err(anyhow::Error::msg)?,
    };
    ensure_logs_dir_exists(&log_dir).map_err(anyhow::Error::msg)?;

    let (log_ui_tx, mut log_ui_rx) = mpsc::channel::<LogLine>(1024);
    let log_collector = LogCollector::new(log_dir, log_ui_tx).map_err(anyhow::Error::msg)?;
    let session_log = format!("{}_monitor.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    log_collector
        .start_new_session(&session_log)
        .map_err(anyhow::Error::msg)?;

    log::set_boxed_logger(Box::new(log_collector.clone()))
        .map(|()| log::set_max_level(log::LevelFilter::Info))
        .context("Failed to install LogCollector as global logger")?;
    log::info!("[Main] stressmon {} logging initialized", stressmon::VERSION);

    let verbose = cli.verbose;
    tokio::spawn(async move {
        while let Some(line) = log_ui_rx.recv().await {
            if verbose && line.kind == LogKind::Full {
                eprintln!("[{}] {}", line.timestamp, line.message);
            }
        }
    });

    // =========================================================================
    // SETTINGS
    // =========================================================================
    let mut settings = match &cli.config {
        Some(path) => load_settings_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_or_default(&get_global_settings_path()?)?,
    };
    if let Some(serial) = cli.serial.clone() {
        settings.adb_serial = Some(serial);
    }
    if let Some(path) = cli.remote_path.clone() {
        settings.remote_status_path = path;
    }
    settings.validate().context("Invalid settings")?;

    // =========================================================================
    // SOURCE AND DRIVER
    // =========================================================================
    let source: Box<dyn TailSource> = match &cli.file {
        Some(path) => Box::new(LocalFileTail::new(path)),
        None => Box::new(
            RemoteTail::adb(
                &settings.adb_path,
                settings.adb_serial.as_deref(),
                &settings.remote_status_path,
                settings.remote_wait(),
            )
            .context("Failed to start adb tail")?,
        ),
    };

    let session = MonitorSession::new(settings)?;
    let mut driver = MonitorDriver::spawn(session).context("Failed to start monitor thread")?;
    if let Some(path) = &cli.schedule {
        driver.load_schedule(LoadScheduler::load_from_file(path)?)?;
    }
    log::info!("[Main] Monitoring {}", source.describe());
    driver.start(source)?;

    // =========================================================================
    // RUN UNTIL COMPLETION, FAILURE, CTRL-C OR DURATION
    // =========================================================================
    let events = driver.events().clone();
    let mut pump = tokio::task::spawn_blocking(move || print_events(events));
    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "interrupted".to_string(),
        _ = deadline => "duration elapsed".to_string(),
        res = &mut pump => match res {
            Ok(reason) => reason,
            Err(e) => format!("event pump failed: {}", e),
        },
    };
    log::info!("[Main] Ending monitor: {}", reason);

    // =========================================================================
    // SHUTDOWN
    // =========================================================================
    driver.stop()?;
    let snapshot = driver.snapshot()?;
    // Ends the driver thread, which closes the event channel and the pump
    driver.shutdown();
    drop(driver);

    print_summary(&snapshot);
    if let Some(path) = &cli.csv {
        match export_csv_to_path(&snapshot.store, &snapshot.targets, None, path) {
            Ok(rows) => eprintln!("[Main] Exported {} row(s) to {}", rows, path.display()),
            Err(ExportError::NoData) => eprintln!("[Main] No data collected, CSV not written"),
            Err(e) => return Err(e).context("CSV export failed"),
        }
    }

    if let Err(e) = log_collector.wait_for_empty().await {
        eprintln!("[Main] WARNING: Failed to flush logs: {}", e);
    }
    eprintln!("[Main] {} ({})", snapshot.status, reason);
    Ok(())
}

/// Print events until the session finishes. Returns why it ended.
fn print_events(events: Receiver<MonitorEvent>) -> String {
    while let Ok(event) = events.recv() {
        match event {
            MonitorEvent::SampleAppended(s) => {
                println!("{:>14.3}  {:<8} {:>7.2}%", s.timestamp, s.key.label(), s.value)
            }
            MonitorEvent::TargetChanged(key, value) => println!("target {} -> {}%", key, value),
            MonitorEvent::StateChanged(state) => eprintln!("[Main] State: {}", state),
            MonitorEvent::TransportFailed(message) => return message,
            MonitorEvent::Completed => return "test completed".to_string(),
        }
    }
    "monitor stopped".to_string()
}

fn print_summary(snapshot: &MonitorSnapshot) {
    for key in snapshot.store.non_empty_keys() {
        let Some(series) = snapshot.store.series(key) else {
            continue;
        };
        let Some(latest) = series.latest() else {
            continue;
        };
        let mean = series.points().iter().map(|p| p.value).sum::<f64>() / series.len() as f64;
        println!(
            "{:<8} samples={:<5} last={:>6.2}% mean={:>6.2}% target={}%",
            key.label(),
            series.len(),
            latest.value,
            mean,
            snapshot.targets.get(key)
        );
    }
}
