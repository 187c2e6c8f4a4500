//! CSV export of a habit's strength history.

use crate::{Result, StrengthPoint};
use std::io::Write;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct HistoryRow {
    date: String,
    strength: u8,
}

impl From<&StrengthPoint> for HistoryRow {
    fn from(point: &StrengthPoint) -> Self {
        HistoryRow {
            date: point.date.to_string(),
            strength: point.strength,
        }
    }
}

/// Write `date,strength` rows (with header) to any writer
///
/// Returns the number of rows written.
pub fn write_history<W: Write>(points: &[StrengthPoint], out: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(out);

    for point in points {
        writer.serialize(HistoryRow::from(point))?;
    }

    // Headers are only emitted with the first record.
    if points.is_empty() {
        writer.write_record(["date", "strength"])?;
    }

    writer.flush()?;
    Ok(points.len())
}

/// Write the history to `csv_path`, replacing any existing file
pub fn write_history_csv(points: &[StrengthPoint], csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = std::fs::File::create(csv_path)?;
    let mut writer = std::io::BufWriter::new(file);
    let rows = write_history(points, &mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    tracing::info!("Wrote {} strength rows to {:?}", rows, csv_path);
    Ok(rows)
}
