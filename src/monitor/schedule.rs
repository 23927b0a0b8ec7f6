//! Target values and the scheduled load ramp.
//!
//! Targets are the operator's desired percentages per series. They are never
//! mixed with measured values; they feed the CSV export and the stress tool
//! command line.
//!
//! A `LoadScheduler` changes targets at elapsed-time offsets into a test:
//! - `Sudden` changes apply when their offset is reached.
//! - `Harmonic` changes ramp linearly from the current target over the
//!   window that ends at the offset, then land exactly on the new value.

use crate::error::ConfigError;
use crate::models::SeriesKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_TARGET: u8 = 50;
pub const DEFAULT_RAMP_WINDOW_SECS: f64 = 120.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTable {
    targets: BTreeMap<SeriesKey, u8>,
    link_cores: bool,
}

impl TargetTable {
    /// All subsystems and cores `0..core_count` start at the default target.
    pub fn new(core_count: u32, link_cores: bool) -> Self {
        let mut targets = BTreeMap::new();
        for key in [SeriesKey::CPU, SeriesKey::GPU, SeriesKey::DRAM] {
            targets.insert(key, DEFAULT_TARGET);
        }
        for id in 0..core_count {
            targets.insert(SeriesKey::Core(id), DEFAULT_TARGET);
        }
        TargetTable { targets, link_cores }
    }

    pub fn get(&self, key: SeriesKey) -> u8 {
        self.targets.get(&key).copied().unwrap_or(DEFAULT_TARGET)
    }

    /// Set a target, clamped to 100. Returns `None` for unknown series,
    /// otherwise every `(key, value)` whose target actually moved.
    ///
    /// With linked cores, the CPU target is copied to every core.
    pub fn set(&mut self, key: SeriesKey, value: u8) -> Option<Vec<(SeriesKey, u8)>> {
        let value = value.min(100);
        let slot = self.targets.get_mut(&key)?;
        let mut changed = Vec::new();
        if *slot != value {
            *slot = value;
            changed.push((key, value));
        }

        if key == SeriesKey::CPU && self.link_cores {
            for (k, v) in self.targets.iter_mut() {
                if matches!(k, SeriesKey::Core(_)) && *v != value {
                    *v = value;
                    changed.push((*k, value));
                }
            }
        }
        Some(changed)
    }

    pub fn link_cores(&self) -> bool {
        self.link_cores
    }

    pub fn set_link_cores(&mut self, link: bool) {
        self.link_cores = link;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampMode {
    Sudden,
    Harmonic,
}

/// One scheduled target change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledChange {
    /// Seconds since the test started
    pub at_secs: f64,
    pub key: SeriesKey,
    pub target: u8,
    #[serde(default = "default_mode")]
    pub mode: RampMode,
}

fn default_mode() -> RampMode {
    RampMode::Sudden
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    start_s: f64,
    end_s: f64,
    start_v: u8,
    end_v: u8,
}

impl Ramp {
    fn value_at(&self, elapsed: f64) -> u8 {
        let span = (self.end_s - self.start_s).max(1e-6);
        let alpha = ((elapsed - self.start_s) / span).clamp(0.0, 1.0);
        let v = self.start_v as f64 + (self.end_v as f64 - self.start_v as f64) * alpha;
        v.round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone)]
pub struct LoadScheduler {
    pending: Vec<ScheduledChange>,
    ramps: BTreeMap<SeriesKey, Ramp>,
    ramp_window_secs: f64,
}

impl LoadScheduler {
    pub fn new(mut changes: Vec<ScheduledChange>) -> Self {
        changes.sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
        LoadScheduler {
            pending: changes,
            ramps: BTreeMap::new(),
            ramp_window_secs: DEFAULT_RAMP_WINDOW_SECS,
        }
    }

    /// Read a JSON array of scheduled changes
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(format!("Schedule not found at: {}", path.display()))
            } else {
                ConfigError::IoError(e)
            }
        })?;
        let changes: Vec<ScheduledChange> = serde_json::from_str(&content)?;
        if let Some(bad) = changes.iter().find(|c| !c.at_secs.is_finite() || c.at_secs < 0.0) {
            return Err(ConfigError::ValidationFailed(format!(
                "scheduled change for {} has invalid time {}",
                bad.key, bad.at_secs
            )));
        }
        Ok(Self::new(changes))
    }

    pub fn pending(&self) -> &[ScheduledChange] {
        &self.pending
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.ramps.is_empty()
    }

    /// Apply everything due at `elapsed` seconds. Returns the targets that
    /// changed, linked cores included.
    pub fn check(&mut self, elapsed: f64, targets: &mut TargetTable) -> Vec<(SeriesKey, u8)> {
        let mut applied = Vec::new();

        // Ramps already in progress
        let mut landed = Vec::new();
        for (key, ramp) in &self.ramps {
            if elapsed >= ramp.end_s {
                applied.extend(targets.set(*key, ramp.end_v).unwrap_or_default());
                landed.push((*key, ramp.end_s));
            } else if elapsed >= ramp.start_s {
                applied.extend(targets.set(*key, ramp.value_at(elapsed)).unwrap_or_default());
            }
        }
        for (key, _) in &landed {
            self.ramps.remove(key);
        }

        let mut remaining = Vec::with_capacity(self.pending.len());
        for change in self.pending.drain(..) {
            if elapsed >= change.at_secs {
                // A finished ramp already wrote this change
                let ramped = landed
                    .iter()
                    .position(|(key, end_s)| *key == change.key && *end_s == change.at_secs);
                match ramped {
                    Some(i) if change.mode == RampMode::Harmonic => {
                        landed.swap_remove(i);
                    }
                    _ => applied.extend(targets.set(change.key, change.target).unwrap_or_default()),
                }
                continue;
            }
            if change.mode == RampMode::Harmonic {
                let start_s = (change.at_secs - self.ramp_window_secs).max(0.0);
                if elapsed >= start_s && !self.ramps.contains_key(&change.key) {
                    self.ramps.insert(
                        change.key,
                        Ramp {
                            start_s,
                            end_s: change.at_secs,
                            start_v: targets.get(change.key),
                            end_v: change.target,
                        },
                    );
                }
            }
            remaining.push(change);
        }
        self.pending = remaining;

        if !applied.is_empty() {
            log::debug!("[Schedule] t={:.1}s applied {:?}", elapsed, applied);
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_target_propagates_to_linked_cores() {
        let mut targets = TargetTable::new(2, true);
        assert_eq!(
            targets.set(SeriesKey::CPU, 80),
            Some(vec![
                (SeriesKey::CPU, 80),
                (SeriesKey::Core(0), 80),
                (SeriesKey::Core(1), 80),
            ])
        );
        assert_eq!(targets.get(SeriesKey::Core(0)), 80);
        assert_eq!(targets.get(SeriesKey::Core(1)), 80);

        targets.set_link_cores(false);
        assert_eq!(targets.set(SeriesKey::CPU, 10), Some(vec![(SeriesKey::CPU, 10)]));
        assert_eq!(targets.get(SeriesKey::Core(0)), 80);
    }

    #[test]
    fn test_target_clamped_and_unknown_rejected() {
        let mut targets = TargetTable::new(1, false);
        targets.set(SeriesKey::GPU, 250);
        assert_eq!(targets.get(SeriesKey::GPU), 100);
        assert_eq!(targets.set(SeriesKey::GPU, 100), Some(vec![]));
        assert_eq!(targets.set(SeriesKey::Core(9), 10), None);
    }

    #[test]
    fn test_sudden_change_applies_at_offset() {
        let mut targets = TargetTable::new(0, false);
        let mut sched = LoadScheduler::new(vec![ScheduledChange {
            at_secs: 60.0,
            key: SeriesKey::DRAM,
            target: 90,
            mode: RampMode::Sudden,
        }]);

        assert!(sched.check(59.0, &mut targets).is_empty());
        assert_eq!(sched.check(60.0, &mut targets), vec![(SeriesKey::DRAM, 90)]);
        assert_eq!(targets.get(SeriesKey::DRAM), 90);
        assert!(sched.is_finished());
    }

    #[test]
    fn test_harmonic_ramp_interpolates_linearly() {
        let mut targets = TargetTable::new(0, false);
        targets.set(SeriesKey::GPU, 0);
        let mut sched = LoadScheduler::new(vec![ScheduledChange {
            at_secs: 300.0,
            key: SeriesKey::GPU,
            target: 100,
            mode: RampMode::Harmonic,
        }]);

        // Before the window nothing happens; at its start the ramp is armed
        assert!(sched.check(100.0, &mut targets).is_empty());
        sched.check(180.0, &mut targets);
        assert_eq!(targets.get(SeriesKey::GPU), 0);

        sched.check(240.0, &mut targets);
        assert_eq!(targets.get(SeriesKey::GPU), 50);
        sched.check(270.0, &mut targets);
        assert_eq!(targets.get(SeriesKey::GPU), 75);

        sched.check(300.0, &mut targets);
        assert_eq!(targets.get(SeriesKey::GPU), 100);
        assert!(sched.is_finished());
    }

    #[test]
    fn test_harmonic_change_reports_final_value_once() {
        let mut targets = TargetTable::new(0, false);
        let mut sched = LoadScheduler::new(vec![ScheduledChange {
            at_secs: 200.0,
            key: SeriesKey::GPU,
            target: 90,
            mode: RampMode::Harmonic,
        }]);

        sched.check(100.0, &mut targets);
        assert_eq!(sched.check(200.0, &mut targets), vec![(SeriesKey::GPU, 90)]);
        assert!(sched.is_finished());
        assert!(sched.check(260.0, &mut targets).is_empty());
    }

    #[test]
    fn test_back_to_back_harmonic_changes_both_apply() {
        let mut targets = TargetTable::new(0, false);
        targets.set(SeriesKey::DRAM, 0);
        let mut sched = LoadScheduler::new(vec![
            ScheduledChange {
                at_secs: 200.0,
                key: SeriesKey::DRAM,
                target: 40,
                mode: RampMode::Harmonic,
            },
            ScheduledChange {
                at_secs: 210.0,
                key: SeriesKey::DRAM,
                target: 70,
                mode: RampMode::Harmonic,
            },
        ]);

        sched.check(150.0, &mut targets);
        // Both offsets passed in one step: the second change still lands
        assert_eq!(
            sched.check(230.0, &mut targets),
            vec![(SeriesKey::DRAM, 40), (SeriesKey::DRAM, 70)]
        );
        assert_eq!(targets.get(SeriesKey::DRAM), 70);
        assert!(sched.is_finished());
    }

    #[test]
    fn test_linked_cpu_change_reports_every_core() {
        let mut targets = TargetTable::new(2, true);
        let mut sched = LoadScheduler::new(vec![ScheduledChange {
            at_secs: 10.0,
            key: SeriesKey::CPU,
            target: 80,
            mode: RampMode::Sudden,
        }]);

        assert_eq!(
            sched.check(10.0, &mut targets),
            vec![
                (SeriesKey::CPU, 80),
                (SeriesKey::Core(0), 80),
                (SeriesKey::Core(1), 80),
            ]
        );
    }

    #[test]
    fn test_schedule_json_format() {
        let changes: Vec<ScheduledChange> = serde_json::from_str(
            r#"[{"at_secs": 30, "key": "Core 1", "target": 70, "mode": "harmonic"},
                {"at_secs": 10, "key": "CPU", "target": 20}]"#,
        )
        .unwrap();
        let sched = LoadScheduler::new(changes);
        assert_eq!(sched.pending()[0].key, SeriesKey::CPU);
        assert_eq!(sched.pending()[0].mode, RampMode::Sudden);
        assert_eq!(sched.pending()[1].key, SeriesKey::Core(1));
    }
}
