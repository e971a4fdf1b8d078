//! Loading the field-collected static-pressure update table.
//!
//! The table is a delimited export from the work-order system, one row per
//! completed pressure test. We only care about three of its columns; the
//! facility identifier itself is buried inside the free-text asset label.

use chrono::NaiveDateTime;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{JobError, Result};
use crate::utils::{normalize_column_name, open_csvz_from_path, parse_timestamp, substring_from};

/// Source columns, as named in the export. Looked up after normalisation,
/// so `Actual Stop Date` and `Actual_Stop_Date` both work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateColumns {
    pub asset: String,
    pub pressure: String,
    pub stop_date: String,
}

impl Default for UpdateColumns {
    fn default() -> Self {
        Self {
            asset: String::from("Asset"),
            pressure: String::from("Static Pressure"),
            stop_date: String::from("Actual Stop Date"),
        }
    }
}

/// How to read an update table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSchema {
    pub columns: UpdateColumns,
    /// Character offset in the asset label where the facility identifier starts.
    pub label_offset: usize,
    pub delimiter: u8,
}

impl Default for UpdateSchema {
    fn default() -> Self {
        Self {
            columns: UpdateColumns::default(),
            label_offset: 14,
            delimiter: b',',
        }
    }
}

/// One usable field reading.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    pub facility_id: String,
    /// Never zero: zero means the crew recorded no reading.
    pub static_pressure: f64,
    pub stop_date: NaiveDateTime,
}

/// The cleaned table, plus what was thrown away on the way in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateTable {
    pub records: Vec<UpdateRecord>,
    pub rows_read: usize,
    pub zero_pressure: usize,
    /// Rows with an empty pressure or stop date.
    pub blank: usize,
}

/// Reads the update table at `path`, which may be zipped.
pub fn read_update_file(path: &Path, schema: &UpdateSchema) -> Result<UpdateTable> {
    info!("Loading pressure updates from {}", path.display());
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    load_updates(open_csvz_from_path(path)?, schema, &name)
}

/// Reads an update table from a stream.
pub fn load_updates<R: Read>(reader: R, schema: &UpdateSchema, name: &str) -> Result<UpdateTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(schema.delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_column_name).collect();
    let find = |wanted: &str| {
        let wanted = normalize_column_name(wanted);
        headers.iter().position(|h| *h == wanted)
    };

    let asset_col = find(&schema.columns.asset).ok_or_else(|| JobError::JoinKey {
        side: format!("update table '{}'", name),
        field: schema.columns.asset.clone(),
    })?;
    let pressure_col = find(&schema.columns.pressure).ok_or_else(|| {
        JobError::data_format(name, format!("no '{}' column", schema.columns.pressure))
    })?;
    let date_col = find(&schema.columns.stop_date).ok_or_else(|| {
        JobError::data_format(name, format!("no '{}' column", schema.columns.stop_date))
    })?;

    let mut table = UpdateTable::default();

    for (idx, record) in rdr.records().enumerate() {
        let row = record?;
        let rownum = idx + 1;
        table.rows_read += 1;

        let label = row.get(asset_col).unwrap_or_default();
        let facility_id = substring_from(label, schema.label_offset);

        let raw_pressure = row.get(pressure_col).unwrap_or_default();
        let raw_date = row.get(date_col).unwrap_or_default();
        if raw_pressure.trim().is_empty() || raw_date.trim().is_empty() {
            debug!("row {}: blank pressure or date for '{}', no reading taken", rownum, facility_id);
            table.blank += 1;
            continue;
        }

        let static_pressure = raw_pressure
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite())
            .ok_or_else(|| {
                JobError::data_format(
                    name,
                    format!(
                        "row {}: cannot read {} '{}' as a number",
                        rownum, schema.columns.pressure, raw_pressure
                    ),
                )
            })?;

        let stop_date = parse_timestamp(raw_date).ok_or_else(|| {
            JobError::data_format(
                name,
                format!(
                    "row {}: cannot read {} '{}' as a date",
                    rownum, schema.columns.stop_date, raw_date
                ),
            )
        })?;

        if static_pressure == 0.0 {
            debug!("row {}: zero pressure for '{}', no reading taken", rownum, facility_id);
            table.zero_pressure += 1;
            continue;
        }

        table.records.push(UpdateRecord {
            facility_id,
            static_pressure,
            stop_date,
        });
    }

    info!(
        "{} update rows read, {} kept, {} discarded for zero pressure, {} blank",
        table.rows_read,
        table.records.len(),
        table.zero_pressure,
        table.blank
    );
    Ok(table)
}
