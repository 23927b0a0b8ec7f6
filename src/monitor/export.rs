//! CSV export of stored series.
//!
//! Format: `timestamp,subsystem,value_percent,target_percent` with the
//! timestamp truncated to whole epoch seconds and the value to 3 decimals.

use super::schedule::TargetTable;
use super::store::TimeSeriesStore;
use crate::error::ExportError;
use crate::models::SeriesKey;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const CSV_HEADER: &str = "timestamp,subsystem,value_percent,target_percent";

/// Write `keys` (or every non-empty series when `None`) to `out`.
///
/// Rows are grouped by series in key order: subsystems, then cores.
/// Returns the number of data rows written.
pub fn export_csv<W: Write>(
    store: &TimeSeriesStore,
    targets: &TargetTable,
    keys: Option<&[SeriesKey]>,
    out: W,
) -> Result<usize, ExportError> {
    let mut selected: Vec<SeriesKey> = match keys {
        Some(keys) => keys.to_vec(),
        None => store.non_empty_keys(),
    };
    selected.sort();
    selected.dedup();

    let has_rows = selected
        .iter()
        .any(|k| store.series(*k).map_or(false, |s| !s.is_empty()));
    if !has_rows {
        return Err(ExportError::NoData);
    }

    let mut out = BufWriter::new(out);
    writeln!(out, "{}", CSV_HEADER)?;

    let mut rows = 0;
    for key in selected {
        let Some(series) = store.series(key) else {
            continue;
        };
        let target = targets.get(key);
        for point in series.points() {
            writeln!(
                out,
                "{},{},{:.3},{}",
                point.timestamp.trunc() as i64,
                key.label(),
                point.value,
                target
            )?;
            rows += 1;
        }
    }
    out.flush()?;
    Ok(rows)
}

/// Export to a file path, creating or truncating it.
pub fn export_csv_to_path(
    store: &TimeSeriesStore,
    targets: &TargetTable,
    keys: Option<&[SeriesKey]>,
    path: &Path,
) -> Result<usize, ExportError> {
    let file = File::create(path)?;
    let rows = export_csv(store, targets, keys, file)?;
    log::info!("[Export] Wrote {} row(s) to {}", rows, path.display());
    Ok(rows)
}
