//! Row codec for the public MLS/OpenCellID cell export format.
//!
//! Both directions use the same ordered column table, so a file written by the
//! exporter can be read back by the importer. Reordering or renaming a column
//! breaks every previously published file.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use csv::StringRecord;
use serde::Deserialize;
use strum::{EnumCount, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;

use crate::model::{CellRecord, Radio, UNKNOWN_COORD, UNKNOWN_ID};

/// Columns of an export file, in file order.
///
/// The strum names are the public column names. They must stay in step with
/// the serde renames on [`Record`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, EnumString, IntoStaticStr,
)]
pub enum Field {
    #[strum(serialize = "radio")]
    Radio,
    #[strum(serialize = "mcc")]
    Mcc,
    #[strum(serialize = "net")]
    Mnc,
    #[strum(serialize = "area")]
    Lac,
    #[strum(serialize = "cell")]
    Cid,
    #[strum(serialize = "unit")]
    Psc,
    #[strum(serialize = "lon")]
    Lon,
    #[strum(serialize = "lat")]
    Lat,
    #[strum(serialize = "range")]
    Range,
    #[strum(serialize = "samples")]
    Samples,
    #[strum(serialize = "changeable")]
    Changeable,
    #[strum(serialize = "created")]
    Created,
    #[strum(serialize = "updated")]
    Updated,
    #[strum(serialize = "averageSignal")]
    AverageSignal,
}

impl Field {
    pub fn external_name(self) -> &'static str {
        self.into()
    }

    /// Position of the column in a file row.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`Field::external_name`].
    pub fn from_external_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

/// MLS serde representation of a file row.
///
/// Rows are decoded by position when the file has no header and by column
/// name when it does. Missing trailing columns and empty values are `None`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Record {
    radio: String,
    mcc: Option<i32>,
    #[serde(rename = "net")]
    mnc: Option<i32>,
    #[serde(rename = "area")]
    lac: Option<i32>,
    #[serde(rename = "cell")]
    cid: Option<i64>,
    #[serde(rename = "unit")]
    psc: Option<i32>,
    lon: Option<f64>,
    lat: Option<f64>,
    range: Option<f64>,
    samples: Option<i32>,
    changeable: Option<String>,
    created: Option<i64>,
    updated: Option<i64>,
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Decode(#[from] csv::Error),
    #[error("invalid boolean in `changeable`: {0:?}")]
    Boolean(String),
    #[error("timestamp out of range in `{field}`: {value}")]
    Timestamp { field: &'static str, value: i64 },
    #[error("`{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// Header row of an export file.
pub fn header() -> StringRecord {
    Field::iter().map(Field::external_name).collect()
}

/// Whether a record is a header row rather than data.
///
/// Some producers omit the header, so the first record of a file is only
/// skipped when its first column names the radio field.
pub fn is_header(record: &StringRecord) -> bool {
    record
        .get(Field::Radio.index())
        .is_some_and(|x| x.trim().eq_ignore_ascii_case(Field::Radio.external_name()))
}

/// Render a record as a file row, in [`Field`] order.
pub fn to_external_row(record: &CellRecord) -> [String; Field::COUNT] {
    let psc = if record.psc == UNKNOWN_ID {
        String::new()
    } else {
        record.psc.to_string()
    };
    let changeable = if record.changeable { "1" } else { "0" };

    [
        record.radio.export_name().to_owned(),
        record.mcc.to_string(),
        record.mnc.to_string(),
        record.lac.to_string(),
        record.cid.to_string(),
        psc,
        record.lon.to_string(),
        record.lat.to_string(),
        record.range.to_string(),
        record.samples.to_string(),
        changeable.to_owned(),
        record.created.timestamp().to_string(),
        record.modified.timestamp().to_string(),
        // averageSignal is reserved
        String::new(),
    ]
}

/// Parse and validate a file row, substituting sentinels for absent values.
///
/// `headers` is the file's header row, if it had one.
pub fn to_internal_row(
    row: &StringRecord,
    headers: Option<&StringRecord>,
) -> Result<CellRecord, RowError> {
    let record: Record = row.deserialize(headers)?;

    let cell = CellRecord {
        radio: Radio::from_import_name(&record.radio),
        mcc: record.mcc.unwrap_or(UNKNOWN_ID),
        mnc: record.mnc.unwrap_or(UNKNOWN_ID),
        lac: record.lac.unwrap_or(UNKNOWN_ID),
        cid: record.cid.unwrap_or(UNKNOWN_ID.into()),
        psc: record.psc.unwrap_or(UNKNOWN_ID),
        lat: record.lat.unwrap_or(UNKNOWN_COORD),
        lon: record.lon.unwrap_or(UNKNOWN_COORD),
        range: range(record.range)?,
        samples: record.samples.unwrap_or(UNKNOWN_ID),
        changeable: changeable(record.changeable.as_deref())?,
        created: timestamp(Field::Created, record.created)?,
        modified: timestamp(Field::Updated, record.updated)?,
    };
    validate(&cell)?;
    Ok(cell)
}

// providers publish fractional ranges, the database keeps whole meters
fn range(range: Option<f64>) -> Result<i32, RowError> {
    let Some(range) = range else {
        return Ok(0);
    };
    if !(0.0..=i32::MAX as f64).contains(&range) {
        return Err(out_of_range(Field::Range, range));
    }
    Ok(range.trunc() as i32)
}

fn changeable(value: Option<&str>) -> Result<bool, RowError> {
    let Some(value) = value else {
        return Ok(true);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(RowError::Boolean(value.to_owned())),
    }
}

fn timestamp(field: Field, seconds: Option<i64>) -> Result<DateTime<Utc>, RowError> {
    let seconds = seconds.unwrap_or(0);
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(RowError::Timestamp {
            field: field.external_name(),
            value: seconds,
        })
}

/// Reject values no real cell can have.
///
/// Absent values were already replaced by their sentinels and pass.
fn validate(cell: &CellRecord) -> Result<(), RowError> {
    if cell.mcc != UNKNOWN_ID && !(1..=999).contains(&cell.mcc) {
        return Err(out_of_range(Field::Mcc, cell.mcc));
    }
    for (field, value) in [
        (Field::Mnc, i64::from(cell.mnc)),
        (Field::Lac, i64::from(cell.lac)),
        (Field::Cid, cell.cid),
        (Field::Psc, i64::from(cell.psc)),
        (Field::Samples, i64::from(cell.samples)),
    ] {
        if value < i64::from(UNKNOWN_ID) {
            return Err(out_of_range(field, value));
        }
    }
    if cell.lat != UNKNOWN_COORD && !(-90.0..=90.0).contains(&cell.lat) {
        return Err(out_of_range(Field::Lat, cell.lat));
    }
    if cell.lon != UNKNOWN_COORD && !(-180.0..=180.0).contains(&cell.lon) {
        return Err(out_of_range(Field::Lon, cell.lon));
    }
    Ok(())
}

fn out_of_range(field: Field, value: impl ToString) -> RowError {
    RowError::OutOfRange {
        field: field.external_name(),
        value: value.to_string(),
    }
}
