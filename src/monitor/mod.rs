//! Stress-test monitoring pipeline.
//!
//! ```text
//! TailSource ──bytes──> LineReassembler ──lines──> BlockSegmenter
//!                                                       │ committed blocks
//!                                                       v
//!                     TimeSeriesStore <──one per tick── Pacer
//! ```
//!
//! `MonitorSession` wires the stages together and `MonitorDriver` runs a
//! session on its own thread. Everything between the tail source and the
//! store is synchronous and single-threaded; the only cross-thread hop is the
//! channel that carries remote process output.

pub mod clock;
pub mod driver;
pub mod export;
pub mod pacer;
pub mod patterns;
pub mod reassembler;
pub mod schedule;
pub mod segmenter;
pub mod session;
pub mod store;
pub mod tail;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{MonitorCommand, MonitorDriver, MonitorEvent, MonitorSnapshot};
pub use export::{export_csv, export_csv_to_path, CSV_HEADER};
pub use pacer::{PacedSample, Pacer};
pub use patterns::{Extracted, Field, PatternTable};
pub use reassembler::{reassemble, LineReassembler};
pub use schedule::{LoadScheduler, RampMode, ScheduledChange, TargetTable};
pub use segmenter::BlockSegmenter;
pub use session::{MonitorSession, RawLog};
pub use store::{SampleAppended, TimeSeries, TimeSeriesStore};
pub use tail::{wait_and_tail_script, LocalFileTail, RemoteTail, TailChunk, TailSource};
