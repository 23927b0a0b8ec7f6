//! Session driver: runs a `MonitorSession` on its own thread.
//!
//! All session mutations happen on the driver thread. A `select!` loop
//! multiplexes three inputs:
//! - control commands from the front end,
//! - the pacer ticker,
//! - the poll ticker that reads the tail source.
//!
//! Anything the front end needs to render goes out as `MonitorEvent`s on an
//! unbounded channel, so a slow consumer never stalls the pipeline.

use super::clock::Clock;
use super::schedule::{LoadScheduler, TargetTable};
use super::session::MonitorSession;
use super::store::{SampleAppended, TimeSeriesStore};
use super::tail::TailSource;
use crate::error::MonitorError;
use crate::models::{SeriesKey, SessionState};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use std::io;
use std::thread::{self, JoinHandle};

pub enum MonitorCommand {
    Start(Box<dyn TailSource>),
    Stop,
    Clear,
    SetTarget(SeriesKey, u8),
    LoadSchedule(LoadScheduler),
    Snapshot(Sender<MonitorSnapshot>),
    Shutdown,
}

/// Copy of the session's displayable state
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub state: SessionState,
    pub store: TimeSeriesStore,
    pub targets: TargetTable,
    pub raw_log: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    SampleAppended(SampleAppended),
    TargetChanged(SeriesKey, u8),
    StateChanged(SessionState),
    TransportFailed(String),
    /// The test finished and every queued block has been displayed
    Completed,
}

pub struct MonitorDriver {
    control: Sender<MonitorCommand>,
    events: Receiver<MonitorEvent>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorDriver {
    pub fn spawn<C: Clock + 'static>(session: MonitorSession<C>) -> io::Result<Self> {
        let (control_tx, control_rx) = unbounded::<MonitorCommand>();
        let (event_tx, event_rx) = unbounded::<MonitorEvent>();

        let handle = thread::Builder::new()
            .name("monitor-driver".to_string())
            .spawn(move || run(session, control_rx, event_tx))?;

        Ok(MonitorDriver {
            control: control_tx,
            events: event_rx,
            handle: Some(handle),
        })
    }

    fn send(&self, command: MonitorCommand) -> Result<(), MonitorError> {
        self.control
            .send(command)
            .map_err(|_| MonitorError::NotRunning)
    }

    pub fn start(&self, source: Box<dyn TailSource>) -> Result<(), MonitorError> {
        self.send(MonitorCommand::Start(source))
    }

    pub fn stop(&self) -> Result<(), MonitorError> {
        self.send(MonitorCommand::Stop)
    }

    pub fn clear(&self) -> Result<(), MonitorError> {
        self.send(MonitorCommand::Clear)
    }

    pub fn set_target(&self, key: SeriesKey, value: u8) -> Result<(), MonitorError> {
        self.send(MonitorCommand::SetTarget(key, value))
    }

    pub fn load_schedule(&self, scheduler: LoadScheduler) -> Result<(), MonitorError> {
        self.send(MonitorCommand::LoadSchedule(scheduler))
    }

    /// Round-trip to the driver thread for a copy of the current state.
    pub fn snapshot(&self) -> Result<MonitorSnapshot, MonitorError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(MonitorCommand::Snapshot(tx))?;
        rx.recv().map_err(|_| MonitorError::NotRunning)
    }

    pub fn events(&self) -> &Receiver<MonitorEvent> {
        &self.events
    }

    /// Stop the session and wait for the driver thread to exit.
    pub fn shutdown(&mut self) {
        let _ = self.control.send(MonitorCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[Driver] Driver thread panicked");
            }
        }
    }
}

impl Drop for MonitorDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<C: Clock>(
    mut session: MonitorSession<C>,
    control: Receiver<MonitorCommand>,
    events: Sender<MonitorEvent>,
) {
    let pacer_tick = tick(session.settings().pacer_tick());
    let poll_tick = tick(session.settings().poll_interval());
    let mut last_state = session.state().clone();
    let mut completion_reported = false;

    log::info!(
        "[Driver] Started (pacer {:?}, poll {:?})",
        session.settings().pacer_tick(),
        session.settings().poll_interval()
    );

    loop {
        select! {
            recv(control) -> msg => match msg {
                Ok(MonitorCommand::Shutdown) | Err(_) => {
                    session.stop();
                    break;
                }
                Ok(command) => handle_command(&mut session, command, &events),
            },
            recv(pacer_tick) -> _ => {
                for appended in session.tick() {
                    let _ = events.send(MonitorEvent::SampleAppended(appended));
                }
                for (key, value) in session.update_schedule() {
                    let _ = events.send(MonitorEvent::TargetChanged(key, value));
                }
            },
            recv(poll_tick) -> _ => {
                if let Err(e) = session.on_data_available() {
                    let _ = events.send(MonitorEvent::TransportFailed(e.user_message()));
                }
            },
        }

        let state = session.state();
        if *state != last_state {
            last_state = state.clone();
            completion_reported = false;
            let _ = events.send(MonitorEvent::StateChanged(last_state.clone()));
        }
        if last_state == SessionState::Completed && session.queue_len() == 0 && !completion_reported {
            completion_reported = true;
            let _ = events.send(MonitorEvent::Completed);
        }
    }

    log::info!("[Driver] Stopped");
}

fn handle_command<C: Clock>(
    session: &mut MonitorSession<C>,
    command: MonitorCommand,
    events: &Sender<MonitorEvent>,
) {
    match command {
        MonitorCommand::Start(source) => {
            if let Err(e) = session.start(source) {
                let _ = events.send(MonitorEvent::TransportFailed(e.user_message()));
            }
        }
        MonitorCommand::Stop => {
            session.stop();
        }
        MonitorCommand::Clear => session.clear(),
        MonitorCommand::SetTarget(key, value) => {
            match session.set_target(key, value) {
                Some(changed) => {
                    for (key, value) in changed {
                        let _ = events.send(MonitorEvent::TargetChanged(key, value));
                    }
                }
                None => log::warn!("[Driver] Ignoring target for unknown series {}", key),
            }
        }
        MonitorCommand::LoadSchedule(scheduler) => session.load_schedule(scheduler),
        MonitorCommand::Snapshot(reply) => {
            let _ = reply.send(MonitorSnapshot {
                state: session.state().clone(),
                store: session.store().clone(),
                targets: session.targets().clone(),
                raw_log: session.raw_log().to_string(),
                status: session.status(),
            });
        }
        MonitorCommand::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorSettings;
    use crate::monitor::clock::ManualClock;
    use crate::monitor::tail::LocalFileTail;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn fast_settings() -> MonitorSettings {
        MonitorSettings {
            block_interval_secs: 5.0,
            pacer_tick_ms: 5,
            poll_interval_ms: 5,
            core_count: 1,
            ..MonitorSettings::default()
        }
    }

    fn wait_for<F: Fn(&MonitorEvent) -> bool>(driver: &MonitorDriver, pred: F) -> MonitorEvent {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let ev = driver
                .events()
                .recv_timeout(left)
                .expect("event did not arrive in time");
            if pred(&ev) {
                return ev;
            }
        }
    }

    #[test]
    fn test_driver_tails_file_and_completes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("status.txt");
        std::fs::write(
            &path,
            "[Monitor] CPU Usage (per core):\ncpu: 12%\ncpu0: 13%\n[Monitor] GPU usage: 3%\nStress test completed\n",
        )
        .unwrap();

        let clock = ManualClock::new(100.0);
        let session = MonitorSession::with_clock(fast_settings(), clock).unwrap();
        let driver = MonitorDriver::spawn(session).unwrap();
        driver.start(Box::new(LocalFileTail::new(&path))).unwrap();

        wait_for(&driver, |e| *e == MonitorEvent::Completed);
        let snapshot = driver.snapshot().unwrap();
        assert_eq!(snapshot.state, SessionState::Completed);
        assert_eq!(snapshot.store.latest(SeriesKey::CPU).unwrap().value, 12.0);
        assert_eq!(snapshot.store.latest(SeriesKey::GPU).unwrap().timestamp, 100.0);
        assert!(snapshot.raw_log.contains("Stress test completed"));
    }

    #[test]
    fn test_set_target_is_reported() {
        let clock = ManualClock::new(0.0);
        let session = MonitorSession::with_clock(fast_settings(), clock).unwrap();
        let driver = MonitorDriver::spawn(session).unwrap();

        driver.set_target(SeriesKey::DRAM, 120).unwrap();
        let ev = wait_for(&driver, |e| matches!(e, MonitorEvent::TargetChanged(..)));
        assert_eq!(ev, MonitorEvent::TargetChanged(SeriesKey::DRAM, 100));
        assert_eq!(driver.snapshot().unwrap().targets.get(SeriesKey::DRAM), 100);
    }

    #[test]
    fn test_linked_cpu_target_reports_core_targets() {
        let session = MonitorSession::with_clock(fast_settings(), ManualClock::new(0.0)).unwrap();
        let driver = MonitorDriver::spawn(session).unwrap();

        driver.set_target(SeriesKey::CPU, 80).unwrap();
        let cpu = wait_for(&driver, |e| matches!(e, MonitorEvent::TargetChanged(..)));
        assert_eq!(cpu, MonitorEvent::TargetChanged(SeriesKey::CPU, 80));
        let core = wait_for(&driver, |e| matches!(e, MonitorEvent::TargetChanged(..)));
        assert_eq!(core, MonitorEvent::TargetChanged(SeriesKey::Core(0), 80));
    }

    #[test]
    fn test_commands_after_shutdown_fail() {
        let session = MonitorSession::with_clock(fast_settings(), ManualClock::new(0.0)).unwrap();
        let mut driver = MonitorDriver::spawn(session).unwrap();
        driver.shutdown();
        assert!(matches!(driver.snapshot(), Err(MonitorError::NotRunning)));
    }
}
