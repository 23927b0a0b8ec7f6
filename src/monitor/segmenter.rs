//! Block segmentation and sample extraction.
//!
//! The stress tool prints one block of lines per reporting cycle:
//!
//! ```text
//! [Monitor] CPU Usage (per core):
//! cpu: 55.5%
//! cpu0: 60%
//! cpu1: 51%
//! [Monitor] DRAM usage: 4.2%
//! [Monitor] GPU usage: 0%
//! ```
//!
//! `BlockSegmenter` is a two-state machine (idle / active) fed one line at a
//! time. A block is committed when:
//! - the GPU line arrives (canonical end of block),
//! - a blank line arrives after DRAM or GPU was recorded,
//! - a new block starts while the current one holds any field.
//!
//! Irregular output never fails: unknown lines are skipped, repeated fields
//! keep the latest value, and lines before the first block start are noise.

use super::patterns::{Extracted, PatternTable};
use crate::models::PartialSample;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BlockSegmenter {
    table: Arc<PatternTable>,
    active: Option<PartialSample>,
}

impl BlockSegmenter {
    pub fn new(table: Arc<PatternTable>) -> Self {
        BlockSegmenter { table, active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The block currently being accumulated, if any
    pub fn active_block(&self) -> Option<&PartialSample> {
        self.active.as_ref()
    }

    /// Process one line. Returns the committed block, if this line closed one.
    pub fn push_line(&mut self, line: &str) -> Option<PartialSample> {
        if self.table.is_block_start(line) {
            let previous = self.active.replace(PartialSample::new());
            return previous.filter(|block| !block.is_empty());
        }

        let block = self.active.as_mut()?;

        match self.table.extract(line) {
            Some(Extracted::CpuOverall(v)) => block.cpu_overall = Some(v),
            Some(Extracted::CpuCore(id, v)) => {
                block.cpu_cores.insert(id, v);
            }
            Some(Extracted::Dram(v)) => block.dram = Some(v),
            Some(Extracted::Gpu(v)) => {
                block.gpu = Some(v);
                return self.active.take();
            }
            None => {
                if line.trim().is_empty() && (block.dram.is_some() || block.gpu.is_some()) {
                    return self.active.take();
                }
            }
        }
        None
    }

    /// Process a batch of lines, collecting every committed block in order.
    pub fn push_lines<S: AsRef<str>>(&mut self, lines: &[S]) -> Vec<PartialSample> {
        lines
            .iter()
            .filter_map(|line| self.push_line(line.as_ref()))
            .collect()
    }

    /// Close the active block at end of stream. Empty blocks are dropped.
    pub fn flush(&mut self) -> Option<PartialSample> {
        self.active.take().filter(|block| !block.is_empty())
    }

    pub fn reset(&mut self) {
        self.active = None;
    }
}

impl Default for BlockSegmenter {
    fn default() -> Self {
        BlockSegmenter::new(Arc::new(PatternTable::default()))
    }
}
