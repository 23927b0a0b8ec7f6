//! Core data types for Stressmon.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Monitored subsystem of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Subsystem {
    Cpu,
    Gpu,
    Dram,
}

impl Subsystem {
    pub const ALL: [Subsystem; 3] = [Subsystem::Cpu, Subsystem::Gpu, Subsystem::Dram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Cpu => "CPU",
            Subsystem::Gpu => "GPU",
            Subsystem::Dram => "DRAM",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one time series: an overall subsystem or a single CPU core.
///
/// Ordering puts subsystems first, then cores by ascending id, which is the
/// row order used by the CSV export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKey {
    Subsystem(Subsystem),
    Core(u32),
}

impl SeriesKey {
    pub const CPU: SeriesKey = SeriesKey::Subsystem(Subsystem::Cpu);
    pub const GPU: SeriesKey = SeriesKey::Subsystem(Subsystem::Gpu);
    pub const DRAM: SeriesKey = SeriesKey::Subsystem(Subsystem::Dram);

    /// Human readable label, e.g. `CPU` or `Core 3`
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKey::Subsystem(s) => write!(f, "{}", s),
            SeriesKey::Core(id) => write!(f, "Core {}", id),
        }
    }
}

impl From<Subsystem> for SeriesKey {
    fn from(s: Subsystem) -> Self {
        SeriesKey::Subsystem(s)
    }
}

impl FromStr for SeriesKey {
    type Err = String;

    /// Accepts `CPU`, `GPU`, `DRAM` (any case) and core labels `Core 3`, `Core3`, `cpu3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => return Ok(SeriesKey::CPU),
            "gpu" => return Ok(SeriesKey::GPU),
            "dram" => return Ok(SeriesKey::DRAM),
            _ => {}
        }

        let digits = lower
            .strip_prefix("core")
            .or_else(|| lower.strip_prefix("cpu"))
            .map(str::trim);
        match digits {
            Some(d) if !d.is_empty() => d
                .parse::<u32>()
                .map(SeriesKey::Core)
                .map_err(|_| format!("invalid core id in series key '{}'", trimmed)),
            _ => Err(format!("unknown series key '{}'", trimmed)),
        }
    }
}

impl Serialize for SeriesKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SeriesKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct SeriesKeyVisitor;

        impl<'de> Visitor<'de> for SeriesKeyVisitor {
            type Value = SeriesKey;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a series label such as \"CPU\" or \"Core 2\", or a core id")
            }

            fn visit_str<E>(self, value: &str) -> Result<SeriesKey, E>
            where
                E: de::Error,
            {
                value.parse().map_err(de::Error::custom)
            }

            // Bare integers are core ids
            fn visit_u64<E>(self, value: u64) -> Result<SeriesKey, E>
            where
                E: de::Error,
            {
                u32::try_from(value)
                    .map(SeriesKey::Core)
                    .map_err(|_| de::Error::custom(format!("core id {} out of range", value)))
            }
        }

        deserializer.deserialize_any(SeriesKeyVisitor)
    }
}

/// Sparse measurement accumulated from one block of device output.
///
/// Every field is optional so that "not reported" stays distinct from `0.0`
/// all the way to the time-series store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialSample {
    pub cpu_overall: Option<f64>,
    pub cpu_cores: BTreeMap<u32, f64>,
    pub dram: Option<f64>,
    pub gpu: Option<f64>,
}

impl PartialSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no field has been recorded
    pub fn is_empty(&self) -> bool {
        self.cpu_overall.is_none()
            && self.cpu_cores.is_empty()
            && self.dram.is_none()
            && self.gpu.is_none()
    }

    /// Flatten the recorded fields into (series, value) pairs.
    pub fn entries(&self) -> Vec<(SeriesKey, f64)> {
        let mut out = Vec::with_capacity(3 + self.cpu_cores.len());
        if let Some(v) = self.cpu_overall {
            out.push((SeriesKey::CPU, v));
        }
        if let Some(v) = self.gpu {
            out.push((SeriesKey::GPU, v));
        }
        if let Some(v) = self.dram {
            out.push((SeriesKey::DRAM, v));
        }
        out.extend(self.cpu_cores.iter().map(|(id, v)| (SeriesKey::Core(*id), *v)));
        out
    }
}

/// One stored point of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Epoch seconds
    pub timestamp: f64,
    /// Percent, 0..=100
    pub value: f64,
}

/// Lifecycle state of a monitoring session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No tail source attached
    Idle,
    /// Tail source attached and being read
    Running,
    /// The device reported completion; queued samples are still being paced out
    Completed,
    /// The tail source failed; queued samples were discarded
    Failed(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Completed => write!(f, "Completed"),
            SessionState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_parse_variants() {
        assert_eq!("CPU".parse::<SeriesKey>(), Ok(SeriesKey::CPU));
        assert_eq!("dram".parse::<SeriesKey>(), Ok(SeriesKey::DRAM));
        assert_eq!("Core0".parse::<SeriesKey>(), Ok(SeriesKey::Core(0)));
        assert_eq!("Core 12".parse::<SeriesKey>(), Ok(SeriesKey::Core(12)));
        assert_eq!("cpu3".parse::<SeriesKey>(), Ok(SeriesKey::Core(3)));
        assert!("Core".parse::<SeriesKey>().is_err());
        assert!("NPU".parse::<SeriesKey>().is_err());
    }

    #[test]
    fn test_series_key_ordering_subsystems_first() {
        let mut keys = vec![SeriesKey::Core(1), SeriesKey::DRAM, SeriesKey::Core(0), SeriesKey::CPU];
        keys.sort();
        assert_eq!(
            keys,
            vec![SeriesKey::CPU, SeriesKey::DRAM, SeriesKey::Core(0), SeriesKey::Core(1)]
        );
    }

    #[test]
    fn test_series_key_serde_roundtrip_as_label() {
        let json = serde_json::to_string(&SeriesKey::Core(4)).unwrap();
        assert_eq!(json, "\"Core 4\"");
        let back: SeriesKey = serde_json::from_str("\"GPU\"").unwrap();
        assert_eq!(back, SeriesKey::GPU);
        let by_id: SeriesKey = serde_json::from_str("7").unwrap();
        assert_eq!(by_id, SeriesKey::Core(7));
    }

    #[test]
    fn test_partial_sample_absent_is_not_zero() {
        let mut sample = PartialSample::new();
        assert!(sample.is_empty());
        sample.gpu = Some(0.0);
        assert!(!sample.is_empty());
        assert_eq!(sample.entries(), vec![(SeriesKey::GPU, 0.0)]);
    }
}
