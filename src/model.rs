use chrono::{DateTime, Utc};
use strum::{EnumString, IntoStaticStr};
use thiserror::Error;

/// Cell id used by aggregate rows that summarize a whole location area.
pub const LAC_AGGREGATE_CID: i64 = -2;

/// Coordinate stored when a record has no known position.
pub const UNKNOWN_COORD: f64 = -255.0;

/// Placeholder for identifiers that are absent from a source file.
pub const UNKNOWN_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, IntoStaticStr)]
#[strum(ascii_case_insensitive)]
pub enum Radio {
    #[strum(serialize = "")]
    Unknown,
    #[strum(serialize = "GSM")]
    Gsm,
    #[strum(to_string = "UMTS", serialize = "WCDMA")]
    Umts,
    #[strum(serialize = "LTE")]
    Lte,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("radio code {0} has no known radio type")]
pub struct UnknownRadio(pub i16);

impl Radio {
    /// Value of the `radio` column.
    pub fn code(self) -> i16 {
        match self {
            Radio::Unknown => -1,
            Radio::Gsm => 0,
            Radio::Umts => 1,
            Radio::Lte => 2,
        }
    }

    /// Name used in exported files.
    pub fn export_name(self) -> &'static str {
        self.into()
    }

    /// Lenient lookup used on import: unrecognized names become `Unknown`.
    pub fn from_import_name(name: &str) -> Self {
        name.trim().parse().unwrap_or(Radio::Unknown)
    }
}

impl TryFrom<i16> for Radio {
    type Error = UnknownRadio;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(Radio::Unknown),
            0 => Ok(Radio::Gsm),
            1 => Ok(Radio::Umts),
            2 => Ok(Radio::Lte),
            x => Err(UnknownRadio(x)),
        }
    }
}

/// A cell tower record, as exchanged in snapshot files.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub radio: Radio,
    pub mcc: i32,
    pub mnc: i32,
    pub lac: i32,
    pub cid: i64,
    pub psc: i32,

    pub lat: f64,
    pub lon: f64,

    pub range: i32,
    pub samples: i32,
    pub changeable: bool,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Natural key used for upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub radio: Radio,
    pub mcc: i32,
    pub mnc: i32,
    pub lac: i32,
    pub cid: i64,
}

impl CellRecord {
    pub fn key(&self) -> CellKey {
        CellKey {
            radio: self.radio,
            mcc: self.mcc,
            mnc: self.mnc,
            lac: self.lac,
            cid: self.cid,
        }
    }
}

/// Row as it comes out of the `cell`/`ocid_cell` tables.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CellRow {
    pub radio: i16,
    pub mcc: i32,
    pub mnc: i32,
    pub lac: i32,
    pub cid: i64,
    pub psc: i32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub range: i32,
    pub samples: i32,
    pub changeable: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl TryFrom<CellRow> for CellRecord {
    type Error = UnknownRadio;

    fn try_from(row: CellRow) -> Result<Self, Self::Error> {
        Ok(CellRecord {
            radio: Radio::try_from(row.radio)?,
            mcc: row.mcc,
            mnc: row.mnc,
            lac: row.lac,
            cid: row.cid,
            psc: row.psc,
            lat: row.lat.unwrap_or(UNKNOWN_COORD),
            lon: row.lon.unwrap_or(UNKNOWN_COORD),
            range: row.range,
            samples: row.samples,
            changeable: row.changeable,
            created: row.created,
            modified: row.modified,
        })
    }
}

impl From<&CellRecord> for CellRow {
    fn from(record: &CellRecord) -> Self {
        CellRow {
            radio: record.radio.code(),
            mcc: record.mcc,
            mnc: record.mnc,
            lac: record.lac,
            cid: record.cid,
            psc: record.psc,
            lat: Some(record.lat),
            lon: Some(record.lon),
            range: record.range,
            samples: record.samples,
            changeable: record.changeable,
            created: record.created,
            modified: record.modified,
        }
    }
}
