//! Block queue and pacer.
//!
//! Committed blocks are queued and released one per interval, so a burst of
//! blocks (a stalled connection catching up, or a file that already holds a
//! whole run) plays back at a constant rate instead of landing at once.
//!
//! Each released block gets a synthetic timestamp `start_epoch + interval * index`.
//! Real arrival jitter therefore never shows up on the time axis, while the
//! wall-clock gate keeps playback from running ahead of live data.

use crate::models::PartialSample;
use std::collections::VecDeque;
use std::time::Duration;

/// A block released by the pacer
#[derive(Debug, Clone, PartialEq)]
pub struct PacedSample {
    pub index: u64,
    pub timestamp: f64,
    pub sample: PartialSample,
}

#[derive(Debug, Clone)]
pub struct Pacer {
    interval_secs: f64,
    start_epoch: f64,
    block_index: u64,
    next_due: Option<f64>,
    queue: VecDeque<PartialSample>,
}

impl Pacer {
    pub fn new(interval: Duration, start_epoch: f64) -> Self {
        Pacer {
            interval_secs: interval.as_secs_f64(),
            start_epoch,
            block_index: 0,
            next_due: None,
            queue: VecDeque::new(),
        }
    }

    /// Queue a committed block. An idle pacer becomes due immediately.
    pub fn enqueue(&mut self, sample: PartialSample, now: f64) {
        self.queue.push_back(sample);
        if self.next_due.is_none() {
            self.next_due = Some(now);
        }
    }

    /// Release at most one block if it is due.
    pub fn tick(&mut self, now: f64) -> Option<PacedSample> {
        let due = self.next_due?;
        if self.queue.is_empty() || now < due {
            return None;
        }

        let sample = self.queue.pop_front()?;
        let index = self.block_index;
        let timestamp = self.start_epoch + self.interval_secs * index as f64;
        self.block_index += 1;
        self.next_due = Some(now + self.interval_secs);

        log::debug!(
            "[Pacer] Released block idx={} ts={:.3} queued={}",
            index,
            timestamp,
            self.queue.len()
        );
        Some(PacedSample {
            index,
            timestamp,
            sample,
        })
    }

    /// Drop every queued block and go idle. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.next_due = None;
        if dropped > 0 {
            log::info!("[Pacer] Discarded {} queued block(s)", dropped);
        }
        dropped
    }

    /// Start a fresh timeline at `start_epoch`
    pub fn reset(&mut self, start_epoch: f64) {
        self.discard();
        self.start_epoch = start_epoch;
        self.block_index = 0;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Index the next released block will get
    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    pub fn next_due(&self) -> Option<f64> {
        self.next_due
    }

    pub fn start_epoch(&self) -> f64 {
        self.start_epoch
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}
