//! Assorted utility functions: file sniffing, dates and column names.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{JobError, Result};

/// Timestamp layouts seen in field-system exports and GIS attribute tables.
/// Tried in order; the first that parses wins.
const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%m-%d-%Y"];

/// Parse a free-form timestamp string into a naive (zone-less) timestamp.
///
/// Offsets in RFC 3339 strings are dropped after converting to local
/// wall-clock time of that offset, which is what the collection tools record.
/// Bare dates become midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Epoch milliseconds, as GIS exports write date fields into GeoJSON.
pub fn timestamp_from_epoch_millis(millis: i64) -> Option<NaiveDateTime> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.naive_utc())
}

/// Render a timestamp the way the exported layer stores it: date-only when
/// the time is midnight, otherwise date and time.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    if ts.num_seconds_from_midnight() == 0 && ts.nanosecond() == 0 {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// `MMDDYYYY`, the stamp put on every dated output.
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%m%d%Y").to_string()
}

/// Make a column header safe to use as a field name:
/// surrounding whitespace trimmed, inner spaces become `_`, parentheses vanish.
///
/// `"Static Pressure (psi)"` becomes `"Static_Pressure_psi"`.
pub fn normalize_column_name(header: &str) -> String {
    header.trim().replace(['(', ')'], "").replace(' ', "_")
}

/// Everything from the `offset`th character onward.
/// Shorter inputs give an empty string rather than an error.
pub fn substring_from(text: &str, offset: usize) -> String {
    text.chars().skip(offset).collect()
}

/// Opens a delimited file, possibly zipped, for reading.
/// If the zipfile contains more than one file, the first will be returned.
/// Performance note: has to unzip and return the entire file.
pub fn open_csvz<T: 'static + Read + Seek>(mut infile: T) -> Result<Box<dyn Read>> {
    if is_zip(&mut infile)? {
        let mut archive = zip::ZipArchive::new(infile)?;
        let mut inner = archive.by_index(0)?;
        let mut buf: Vec<u8> = Vec::with_capacity(inner.size().try_into().unwrap_or(0));
        inner.read_to_end(&mut buf)?;
        Ok(Box::new(Cursor::new(buf)))
    } else {
        Ok(Box::new(infile))
    }
}

/// Opens `path` as a delimited file, or as a ZIP holding one.
pub fn open_csvz_from_path(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|_| JobError::unavailable("update table", path))?;
    open_csvz(file)
}

/// Peeks at the contents to check the magic number
/// slightly adapted from zip-extensions
/// to operate on a `Read+Seek` rather than a full `File`
pub fn is_zip<T>(infile: &mut T) -> Result<bool>
where
    T: Read + Seek,
{
    const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
    let pos = infile.stream_position()?;
    let mut buffer: [u8; 4] = [0; 4];
    let bytes_read = infile.read(&mut buffer)?;
    infile.seek(SeekFrom::Start(pos))?; // revert
    Ok(bytes_read == ZIP_SIGNATURE.len() && buffer == ZIP_SIGNATURE)
}
