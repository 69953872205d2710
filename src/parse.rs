//! Catalog row parsing.
//!
//! The catalog is plain comma-separated text without quoting or escaping.
//! A value containing a comma cannot be represented and will shift every
//! following column; this is a known limitation of the source format and is
//! not repaired here.
//!
//! Rows are zipped with the header positionally:
//! - header columns beyond the end of the row become [`FieldValue::Null`];
//! - values beyond the end of the header are dropped.

use chrono::NaiveDate;

use crate::error::RecordError;
use crate::models::{CatalogRecord, FieldValue};

/// Fixed format of `acquisitionDate`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const REQUIRED_COLUMNS: [&str; 2] = ["sceneID", "acquisitionDate"];

/// A parsed row with the two fields the pipeline needs already extracted.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub scene_id: String,
    pub acquisition_date: NaiveDate,
    pub record: CatalogRecord,
}

/// Split and validate the header line.
///
/// A header without `sceneID` or `acquisitionDate` aborts the run.
pub fn parse_header(line: &str) -> Result<Vec<String>, RecordError> {
    let line = line.trim_start_matches('\u{feff}').trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(RecordError::EmptyHeader);
    }

    let header: Vec<String> = line.split(',').map(|s| s.trim().to_string()).collect();
    for column in REQUIRED_COLUMNS {
        if !header.iter().any(|h| h == column) {
            return Err(RecordError::MissingColumn(column));
        }
    }
    Ok(header)
}

/// Turn one raw line into a [`CatalogRecord`]. Pure and total.
pub fn parse(header: &[String], line: &str) -> CatalogRecord {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut values = line.split(',');

    header
        .iter()
        .map(|name| {
            let value = values.next().map(coerce).unwrap_or(FieldValue::Null);
            (name.clone(), value)
        })
        .collect()
}

/// Parse a line and extract `sceneID` and `acquisitionDate`.
///
/// Either failing drops the row.
pub fn parse_row(header: &[String], line: &str) -> Result<ParsedRow, RecordError> {
    let record = parse(header, line);
    let scene_id = record.scene_id().ok_or(RecordError::MissingSceneId)?;

    let raw_date = record
        .get("acquisitionDate")
        .map(|v| v.to_string())
        .unwrap_or_default();
    let acquisition_date =
        parse_date(&raw_date).ok_or_else(|| RecordError::BadAcquisitionDate {
            scene_id: scene_id.clone(),
            value: raw_date.clone(),
        })?;

    Ok(ParsedRow {
        scene_id,
        acquisition_date,
        record,
    })
}

/// Best-effort numeric coercion.
///
/// The whole trimmed value must be a finite floating-point literal; anything
/// else (including `NaN` and `inf`) keeps the original string.
pub fn coerce(raw: &str) -> FieldValue {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => FieldValue::Number(n),
        _ => FieldValue::Text(raw.to_string()),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
