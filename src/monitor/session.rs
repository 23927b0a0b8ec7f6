//! Monitoring session: one tail source driving the whole pipeline.
//!
//! `MonitorSession` owns the line reassembler, the block segmenter, the pacer,
//! the time-series store and the operator targets. It is driven by three
//! kinds of calls, all on one thread:
//! - `on_data_available()` polls the tail source and runs reassembly and
//!   segmentation to completion;
//! - `tick()` lets the pacer release at most one block into the store;
//! - `start()` / `stop()` / `clear()` reset state between the other two.
//!
//! A transport failure ends the session and discards queued blocks. The
//! completion marker also ends tailing, but queued blocks keep playing out.

use super::clock::{Clock, SystemClock};
use super::pacer::Pacer;
use super::patterns::PatternTable;
use super::reassembler::LineReassembler;
use super::schedule::{LoadScheduler, TargetTable};
use super::segmenter::BlockSegmenter;
use super::store::{SampleAppended, TimeSeriesStore};
use super::tail::{TailChunk, TailSource};
use crate::config::MonitorSettings;
use crate::error::{ConfigError, MonitorError, TailError};
use crate::models::{PartialSample, SeriesKey, SessionState};
use std::sync::Arc;

/// Bounded text buffer of raw device lines ("Show Log")
#[derive(Debug, Clone, Default)]
pub struct RawLog {
    text: String,
    capacity: usize,
}

impl RawLog {
    pub fn new(capacity: usize) -> Self {
        RawLog {
            text: String::new(),
            capacity,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        if self.text.len() > self.capacity {
            let excess = self.text.len() - self.capacity;
            // Cut at the first line boundary past the excess
            let cut = match self.text.as_bytes()[excess..].iter().position(|b| *b == b'\n') {
                Some(pos) => excess + pos + 1,
                None => self.text.len(),
            };
            self.text.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

pub struct MonitorSession<C: Clock = SystemClock> {
    settings: MonitorSettings,
    clock: C,
    state: SessionState,
    source: Option<Box<dyn TailSource>>,
    reassembler: LineReassembler,
    segmenter: BlockSegmenter,
    pacer: Pacer,
    store: TimeSeriesStore,
    targets: TargetTable,
    scheduler: Option<LoadScheduler>,
    raw_log: RawLog,
    started_at: Option<f64>,
    last_poll_lines: usize,
}

impl MonitorSession<SystemClock> {
    pub fn new(settings: MonitorSettings) -> Result<Self, ConfigError> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> MonitorSession<C> {
    pub fn with_clock(settings: MonitorSettings, clock: C) -> Result<Self, ConfigError> {
        settings.validate()?;
        let table = Arc::new(PatternTable::compile(&settings.report_format)?);
        let now = clock.now();

        Ok(MonitorSession {
            state: SessionState::Idle,
            source: None,
            reassembler: LineReassembler::new(),
            segmenter: BlockSegmenter::new(table),
            pacer: Pacer::new(settings.block_interval(), now),
            store: TimeSeriesStore::new(settings.core_count),
            targets: TargetTable::new(settings.core_count, settings.link_core_targets),
            scheduler: None,
            raw_log: RawLog::new(settings.raw_log_capacity),
            started_at: None,
            last_poll_lines: 0,
            settings,
            clock,
        })
    }

    /// Begin a test on `source`, clearing all data of the previous one.
    ///
    /// The source is read once right away so a file that already holds blocks
    /// shows its first sample on the next tick.
    pub fn start(&mut self, source: Box<dyn TailSource>) -> Result<usize, MonitorError> {
        self.release_source();
        let now = self.clock.now();

        self.reassembler.reset();
        self.segmenter.reset();
        self.pacer.reset(now);
        self.store.clear_all();
        self.raw_log.clear();
        self.last_poll_lines = 0;
        self.started_at = Some(now);

        log::info!("[Session] Starting test on {}", source.describe());
        self.source = Some(source);
        self.state = SessionState::Running;
        self.on_data_available()
    }

    /// Stop now: detach the source and drop anything not yet displayed.
    pub fn stop(&mut self) -> usize {
        self.release_source();
        let dropped = self.pacer.discard();
        self.segmenter.reset();
        self.reassembler.reset();
        self.started_at = None;
        if self.state != SessionState::Idle {
            log::info!("[Session] Stopped ({} queued block(s) discarded)", dropped);
        }
        self.state = SessionState::Idle;
        dropped
    }

    /// Empty every series and the raw log. Tailing continues.
    ///
    /// The tail position and any partial line are kept: the source keeps
    /// following from where it is and nothing already read is replayed.
    pub fn clear(&mut self) {
        self.store.clear_all();
        self.raw_log.clear();
        log::info!("[Session] Cleared all series");
    }

    /// Poll the tail source and process whatever arrived.
    ///
    /// Returns the number of blocks committed to the pacer queue. A transport
    /// error ends the session and is returned to the caller.
    pub fn on_data_available(&mut self) -> Result<usize, MonitorError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };

        match source.poll() {
            Ok(chunk) => Ok(self.ingest_chunk(chunk)),
            Err(e) => {
                self.fail(&e);
                Err(MonitorError::Transport(e))
            }
        }
    }

    fn ingest_chunk(&mut self, chunk: TailChunk) -> usize {
        if chunk.rewound {
            // The partial line belonged to content that no longer exists
            self.reassembler.reset();
        }
        self.ingest(&chunk.data)
    }

    /// Feed raw bytes through reassembly and segmentation.
    pub fn ingest(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let lines = self.reassembler.feed(data);
        self.last_poll_lines = lines.len();

        let now = self.clock.now();
        let mut committed = 0;
        let mut completed = false;
        for line in &lines {
            self.raw_log.push_line(line);
            log::info!(target: "device", "{}", line);

            if let Some(block) = self.segmenter.push_line(line) {
                self.pacer.enqueue(block, now);
                committed += 1;
            }
            if !self.settings.completion_marker.is_empty()
                && line.contains(self.settings.completion_marker.as_str())
            {
                completed = true;
            }
        }

        if committed > 0 {
            log::debug!(
                "[Session] {} line(s), {} block(s) committed, queue={}",
                lines.len(),
                committed,
                self.pacer.queue_len()
            );
        }
        if completed && self.source.is_some() {
            committed += self.complete(now);
        }
        committed
    }

    fn complete(&mut self, now: f64) -> usize {
        let flushed = match self.segmenter.flush() {
            Some(block) => {
                self.pacer.enqueue(block, now);
                1
            }
            None => 0,
        };
        self.release_source();
        self.state = SessionState::Completed;
        log::info!(
            "[Session] Stress test completed, {} block(s) left to display",
            self.pacer.queue_len()
        );
        flushed
    }

    fn fail(&mut self, err: &TailError) {
        log::error!("[Session] Tail source failed: {}", err);
        self.release_source();
        self.pacer.discard();
        self.segmenter.reset();
        self.reassembler.reset();
        self.state = SessionState::Failed(err.to_string());
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
    }

    /// Release at most one paced block into the store.
    pub fn tick(&mut self) -> Vec<SampleAppended> {
        let now = self.clock.now();
        let Some(paced) = self.pacer.tick(now) else {
            return Vec::new();
        };
        self.store_sample(paced.timestamp, &paced.sample)
    }

    fn store_sample(&mut self, timestamp: f64, sample: &PartialSample) -> Vec<SampleAppended> {
        sample
            .entries()
            .into_iter()
            .filter_map(|(key, value)| self.store.append(key, timestamp, value))
            .collect()
    }

    /// Apply scheduled target changes due at the current test time.
    pub fn update_schedule(&mut self) -> Vec<(SeriesKey, u8)> {
        if self.state != SessionState::Running {
            return Vec::new();
        }
        let (Some(started), Some(scheduler)) = (self.started_at, self.scheduler.as_mut()) else {
            return Vec::new();
        };
        let elapsed = self.clock.now() - started;
        scheduler.check(elapsed, &mut self.targets)
    }

    pub fn load_schedule(&mut self, scheduler: LoadScheduler) {
        log::info!(
            "[Session] Loaded schedule with {} change(s)",
            scheduler.pending().len()
        );
        self.scheduler = Some(scheduler);
    }

    /// Set an operator target. Returns every target that changed, or `None`
    /// for a series the session does not track.
    pub fn set_target(&mut self, key: SeriesKey, value: u8) -> Option<Vec<(SeriesKey, u8)>> {
        self.targets.set(key, value)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True while a tail source is attached
    pub fn is_tailing(&self) -> bool {
        self.source.is_some()
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn targets(&self) -> &TargetTable {
        &self.targets
    }

    pub fn raw_log(&self) -> &str {
        self.raw_log.as_str()
    }

    pub fn queue_len(&self) -> usize {
        self.pacer.queue_len()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// One-line diagnostic of the tail and pacer
    pub fn status(&self) -> String {
        let source = self
            .source
            .as_ref()
            .map(|s| s.describe())
            .unwrap_or_else(|| "no source".to_string());
        format!(
            "{} lines={} q={} idx={} state={}",
            source,
            self.last_poll_lines,
            self.pacer.queue_len(),
            self.pacer.block_index(),
            self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::clock::ManualClock;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted tail source
    struct ScriptedTail {
        polls: VecDeque<Result<TailChunk, TailError>>,
    }

    impl ScriptedTail {
        fn boxed(polls: Vec<Result<&[u8], TailError>>) -> Box<dyn TailSource> {
            Box::new(ScriptedTail {
                polls: polls
                    .into_iter()
                    .map(|p| {
                        p.map(|data| TailChunk {
                            data: data.to_vec(),
                            rewound: false,
                        })
                    })
                    .collect(),
            })
        }
    }

    impl TailSource for ScriptedTail {
        fn poll(&mut self) -> Result<TailChunk, TailError> {
            self.polls.pop_front().unwrap_or_else(|| Ok(TailChunk::default()))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    const BLOCK: &[u8] = b"[Monitor] CPU Usage (per core):\ncpu: 40%\ncpu0: 41%\n[Monitor] DRAM usage: 5%\n[Monitor] GPU usage: 2%\n";

    fn session(clock: &ManualClock) -> MonitorSession<ManualClock> {
        let settings = MonitorSettings {
            core_count: 2,
            ..MonitorSettings::default()
        };
        MonitorSession::with_clock(settings, clock.clone()).unwrap()
    }

    #[test]
    fn test_oversized_block_interval_is_rejected_not_panicking() {
        let settings = MonitorSettings {
            block_interval_secs: 1e20,
            ..MonitorSettings::default()
        };
        let result = MonitorSession::with_clock(settings, ManualClock::new(0.0));
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_start_reads_immediately() {
        let clock = ManualClock::new(1000.0);
        let mut s = session(&clock);
        let committed = s.start(ScriptedTail::boxed(vec![Ok(BLOCK)])).unwrap();
        assert_eq!(committed, 1);
        assert_eq!(s.state(), &SessionState::Running);

        let appended = s.tick();
        assert_eq!(appended.len(), 4);
        assert!(appended.iter().all(|a| a.timestamp == 1000.0));
    }

    #[test]
    fn test_transport_error_discards_queue() {
        let clock = ManualClock::new(0.0);
        let mut s = session(&clock);
        let mut burst = Vec::new();
        for _ in 0..3 {
            burst.extend_from_slice(BLOCK);
        }
        s.start(ScriptedTail::boxed(vec![
            Ok(burst.as_slice()),
            Err(TailError::ProcessExited("exit status: 1".to_string())),
        ]))
        .unwrap();
        assert_eq!(s.tick().len(), 4);
        assert_eq!(s.queue_len(), 2);

        let err = s.on_data_available().unwrap_err();
        assert!(matches!(err, MonitorError::Transport(_)));
        assert!(matches!(s.state(), SessionState::Failed(_)));
        assert_eq!(s.queue_len(), 0);

        clock.advance(Duration::from_secs(10));
        assert!(s.tick().is_empty());
        // Already stored points survive
        assert!(s.store().latest(SeriesKey::CPU).is_some());
    }

    #[test]
    fn test_completion_marker_keeps_draining() {
        let clock = ManualClock::new(0.0);
        let mut s = session(&clock);
        let mut data = Vec::new();
        data.extend_from_slice(BLOCK);
        data.extend_from_slice(BLOCK);
        data.extend_from_slice(b"[Monitor] CPU Usage (per core):\ncpu: 9%\nStress test completed\n");
        s.start(ScriptedTail::boxed(vec![Ok(data.as_slice())])).unwrap();

        assert_eq!(s.state(), &SessionState::Completed);
        assert!(!s.is_tailing());
        assert_eq!(s.queue_len(), 3);

        let mut released = 0;
        for _ in 0..3 {
            if !s.tick().is_empty() {
                released += 1;
            }
            clock.advance(Duration::from_secs(5));
        }
        assert_eq!(released, 3);
        assert_eq!(s.store().latest(SeriesKey::CPU).unwrap().value, 9.0);
        assert_eq!(s.store().latest(SeriesKey::CPU).unwrap().timestamp, 10.0);
    }

    #[test]
    fn test_stop_discards_and_restart_resets_epoch() {
        let clock = ManualClock::new(0.0);
        let mut s = session(&clock);
        let mut burst = Vec::new();
        burst.extend_from_slice(BLOCK);
        burst.extend_from_slice(BLOCK);
        s.start(ScriptedTail::boxed(vec![Ok(burst.as_slice())])).unwrap();
        s.tick();
        assert_eq!(s.stop(), 1);
        assert_eq!(s.state(), &SessionState::Idle);

        clock.set(500.0);
        s.start(ScriptedTail::boxed(vec![Ok(BLOCK)])).unwrap();
        assert!(s.store().latest(SeriesKey::CPU).is_none());
        s.tick();
        assert_eq!(s.store().latest(SeriesKey::CPU).unwrap().timestamp, 500.0);
    }

    #[test]
    fn test_partial_lines_across_polls() {
        let clock = ManualClock::new(0.0);
        let mut s = session(&clock);
        let (a, b) = BLOCK.split_at(37);
        s.start(ScriptedTail::boxed(vec![Ok(a), Ok(b)])).unwrap();
        assert_eq!(s.queue_len(), 0);
        assert_eq!(s.on_data_available().unwrap(), 1);
    }

    #[test]
    fn test_raw_log_is_bounded() {
        let mut log = RawLog::new(16);
        log.push_line("0123456789");
        log.push_line("abcdefghij");
        assert_eq!(log.as_str(), "abcdefghij\n");

        // Trimming never splits a multi-byte character
        let mut log = RawLog::new(8);
        log.push_line("ééé");
        log.push_line("ok");
        assert_eq!(log.as_str(), "ok\n");
    }

    #[test]
    fn test_schedule_only_while_running() {
        let clock = ManualClock::new(0.0);
        let mut s = session(&clock);
        s.load_schedule(LoadScheduler::new(vec![super::super::schedule::ScheduledChange {
            at_secs: 10.0,
            key: SeriesKey::GPU,
            target: 90,
            mode: super::super::schedule::RampMode::Sudden,
        }]));
        clock.set(20.0);
        assert!(s.update_schedule().is_empty());

        s.start(ScriptedTail::boxed(vec![])).unwrap();
        clock.advance(Duration::from_secs(10));
        assert_eq!(s.update_schedule(), vec![(SeriesKey::GPU, 90)]);
        assert_eq!(s.targets().get(SeriesKey::GPU), 90);
    }
}
