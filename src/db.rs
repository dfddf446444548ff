//! Access to the cell tables.
//!
//! The pipeline only needs two things from the database: a paged read of the
//! rows eligible for export, and a batched upsert keyed by the natural key.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::model::{CellRecord, CellRow, LAC_AGGREGATE_CID, UNKNOWN_COORD};

#[cfg(test)]
pub mod memory;

// postgres accepts at most 65535 bind parameters per statement
const UPSERT_COLUMNS: usize = 13;
const UPSERT_CHUNK: usize = u16::MAX as usize / UPSERT_COLUMNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum CellTable {
    /// Cells computed from our own submissions
    Cell,
    /// Cells imported from OpenCellID
    OcidCell,
}

impl CellTable {
    pub fn name(self) -> &'static str {
        match self {
            CellTable::Cell => "cell",
            CellTable::OcidCell => "ocid_cell",
        }
    }
}

/// Selection of rows for an export.
///
/// Aggregate rows and rows without a position are always excluded. The
/// optional bounds restrict `modified` to a half-open window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportFilter {
    pub modified_since: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
}

impl ExportFilter {
    pub fn matches(&self, row: &CellRow) -> bool {
        let positioned = matches!(
            (row.lat, row.lon),
            (Some(lat), Some(lon)) if lat != UNKNOWN_COORD && lon != UNKNOWN_COORD
        );
        positioned
            && row.cid != LAC_AGGREGATE_CID
            && self.modified_since.map_or(true, |x| row.modified >= x)
            && self.modified_before.map_or(true, |x| row.modified < x)
    }
}

#[async_trait]
pub trait CellStore: Send + Sync {
    /// One page of eligible rows, ordered by primary key.
    ///
    /// Pages are addressed by offset, so rows inserted or deleted while an
    /// export is running can shift later pages.
    async fn fetch_page(&self, filter: &ExportFilter, limit: i64, offset: i64)
        -> Result<Vec<CellRow>>;

    /// Insert new records and overwrite the mutable columns of existing ones.
    /// The batch is durable once this returns.
    async fn upsert(&self, batch: &[CellRecord]) -> Result<()>;
}

pub struct PgCellStore {
    pool: PgPool,
    table: CellTable,
}

impl PgCellStore {
    pub fn new(pool: PgPool, table: CellTable) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl CellStore for PgCellStore {
    async fn fetch_page(
        &self,
        filter: &ExportFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CellRow>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            r#"select radio, mcc, mnc, lac, cid, psc, lat, lon, "range", samples, changeable, created, modified
            from {} where cid <> "#,
            self.table.name()
        ));
        query.push_bind(LAC_AGGREGATE_CID);
        query.push(" and lat is not null and lon is not null and lat <> ");
        query.push_bind(UNKNOWN_COORD);
        query.push(" and lon <> ");
        query.push_bind(UNKNOWN_COORD);
        if let Some(since) = filter.modified_since {
            query.push(" and modified >= ").push_bind(since);
        }
        if let Some(before) = filter.modified_before {
            query.push(" and modified < ").push_bind(before);
        }
        query.push(" order by id limit ").push_bind(limit);
        query.push(" offset ").push_bind(offset);

        let rows = query
            .build_query_as::<CellRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn upsert(&self, batch: &[CellRecord]) -> Result<()> {
        let batch = last_per_key(batch);
        let mut tx = self.pool.begin().await?;
        for chunk in batch.chunks(UPSERT_CHUNK) {
            let mut query = QueryBuilder::<Postgres>::new(format!(
                r#"insert into {} (radio, mcc, mnc, lac, cid, psc, lat, lon, "range", samples, changeable, created, modified) "#,
                self.table.name()
            ));
            query.push_values(chunk, |mut row, cell| {
                row.push_bind(cell.radio.code())
                    .push_bind(cell.mcc)
                    .push_bind(cell.mnc)
                    .push_bind(cell.lac)
                    .push_bind(cell.cid)
                    .push_bind(cell.psc)
                    .push_bind(cell.lat)
                    .push_bind(cell.lon)
                    .push_bind(cell.range)
                    .push_bind(cell.samples)
                    .push_bind(cell.changeable)
                    .push_bind(cell.created)
                    .push_bind(cell.modified);
            });
            query.push(
                r#" on conflict (radio, mcc, mnc, lac, cid) do update set
                    modified = excluded.modified,
                    samples = excluded.samples,
                    lat = excluded.lat,
                    lon = excluded.lon,
                    psc = excluded.psc,
                    "range" = excluded."range""#,
            );
            query.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }
}

/// Collapse repeated natural keys, keeping the last occurrence of each.
///
/// A single upsert statement may not touch the same row twice, and a later
/// row in a file supersedes an earlier one.
pub fn last_per_key(batch: &[CellRecord]) -> Vec<&CellRecord> {
    let mut last = HashMap::with_capacity(batch.len());
    for (i, record) in batch.iter().enumerate() {
        last.insert(record.key(), i);
    }
    batch
        .iter()
        .enumerate()
        .filter(|(i, record)| last.get(&record.key()) == Some(i))
        .map(|(_, record)| record)
        .collect()
}
