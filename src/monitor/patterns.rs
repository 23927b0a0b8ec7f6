//! Compiled extraction table for the device status report.
//!
//! Patterns are compiled once from a [`ReportFormat`] and tried in a fixed
//! priority order: overall CPU, per-core CPU, DRAM, GPU. The first pattern
//! that matches a line decides what the line means.

use crate::config::ReportFormat;
use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;

static DEFAULT_TABLE: Lazy<PatternTable> = Lazy::new(|| {
    PatternTable::compile(&ReportFormat::default()).expect("Invalid default report format")
});

/// A measured field of the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CpuOverall,
    CpuCore,
    Dram,
    Gpu,
}

impl Field {
    fn name(&self) -> &'static str {
        match self {
            Field::CpuOverall => "cpu_overall",
            Field::CpuCore => "cpu_core",
            Field::Dram => "dram",
            Field::Gpu => "gpu",
        }
    }

    /// Capture groups the pattern must define, not counting group 0
    fn required_groups(&self) -> usize {
        match self {
            Field::CpuCore => 2,
            _ => 1,
        }
    }
}

/// A value pulled out of one report line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extracted {
    CpuOverall(f64),
    CpuCore(u32, f64),
    Dram(f64),
    Gpu(f64),
}

#[derive(Debug, Clone)]
pub struct PatternTable {
    block_start_prefixes: Vec<String>,
    patterns: Vec<(Field, Regex)>,
}

impl PatternTable {
    /// Compile a report format, checking every pattern for its capture groups.
    pub fn compile(format: &ReportFormat) -> Result<Self, ConfigError> {
        if format.block_start_prefixes.iter().all(|p| p.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "report_format needs at least one non-empty block start prefix".to_string(),
            ));
        }

        let sources = [
            (Field::CpuOverall, &format.cpu_overall),
            (Field::CpuCore, &format.cpu_core),
            (Field::Dram, &format.dram),
            (Field::Gpu, &format.gpu),
        ];

        let mut patterns = Vec::with_capacity(sources.len());
        for (field, source) in sources {
            let re = Regex::new(source).map_err(|e| ConfigError::InvalidPattern {
                field: field.name().to_string(),
                reason: e.to_string(),
            })?;
            if re.captures_len() - 1 < field.required_groups() {
                return Err(ConfigError::InvalidPattern {
                    field: field.name().to_string(),
                    reason: format!(
                        "expected {} capture group(s), found {}",
                        field.required_groups(),
                        re.captures_len() - 1
                    ),
                });
            }
            patterns.push((field, re));
        }

        Ok(PatternTable {
            block_start_prefixes: format
                .block_start_prefixes
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
            patterns,
        })
    }

    pub fn is_block_start(&self, line: &str) -> bool {
        self.block_start_prefixes.iter().any(|p| line.starts_with(p.as_str()))
    }

    /// Apply the patterns in priority order.
    ///
    /// Returns `None` for unrelated lines, and also when the first matching
    /// pattern captured something that is not a number.
    pub fn extract(&self, line: &str) -> Option<Extracted> {
        let (field, caps) = self
            .patterns
            .iter()
            .find_map(|(field, re)| re.captures(line).map(|caps| (*field, caps)))?;

        match field {
            Field::CpuCore => {
                let id = caps.get(1)?.as_str().parse::<u32>().ok()?;
                let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
                Some(Extracted::CpuCore(id, value))
            }
            _ => {
                let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
                Some(match field {
                    Field::CpuOverall => Extracted::CpuOverall(value),
                    Field::Dram => Extracted::Dram(value),
                    _ => Extracted::Gpu(value),
                })
            }
        }
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        DEFAULT_TABLE.clone()
    }
}
