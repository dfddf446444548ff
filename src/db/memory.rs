use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{CellStore, ExportFilter};
use crate::model::{CellRecord, CellRow};

/// In-memory table with the same upsert semantics as [`super::PgCellStore`].
#[derive(Default)]
pub struct MemoryCellStore {
    rows: Mutex<Vec<CellRow>>,
    pub pages: AtomicUsize,
    pub largest_page: AtomicUsize,
    pub upserts: AtomicUsize,
    pub largest_upsert: AtomicUsize,
    /// Fail every upsert after this many have succeeded.
    fail_after: Option<usize>,
}

impl MemoryCellStore {
    pub fn failing_after(upserts: usize) -> Self {
        Self {
            fail_after: Some(upserts),
            ..Default::default()
        }
    }

    pub fn insert_row(&self, row: CellRow) {
        self.rows.lock().unwrap().push(row);
    }

    /// All rows in primary key order.
    pub fn rows(&self) -> Vec<CellRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<CellRecord> {
        self.rows()
            .into_iter()
            .map(|row| CellRecord::try_from(row).unwrap())
            .collect()
    }
}

#[async_trait]
impl CellStore for MemoryCellStore {
    async fn fetch_page(
        &self,
        filter: &ExportFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CellRow>> {
        let page: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| filter.matches(row))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        self.pages.fetch_add(1, Ordering::SeqCst);
        self.largest_page.fetch_max(page.len(), Ordering::SeqCst);
        Ok(page)
    }

    async fn upsert(&self, batch: &[CellRecord]) -> Result<()> {
        if self.fail_after == Some(self.upserts.load(Ordering::SeqCst)) {
            bail!("connection reset");
        }

        let mut rows = self.rows.lock().unwrap();
        for record in batch {
            let existing = rows.iter_mut().find(|row| {
                (row.radio, row.mcc, row.mnc, row.lac, row.cid)
                    == (record.radio.code(), record.mcc, record.mnc, record.lac, record.cid)
            });
            match existing {
                Some(row) => {
                    row.modified = record.modified;
                    row.samples = record.samples;
                    row.lat = Some(record.lat);
                    row.lon = Some(record.lon);
                    row.psc = record.psc;
                    row.range = record.range;
                }
                None => rows.push(CellRow::from(record)),
            }
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.largest_upsert.fetch_max(batch.len(), Ordering::SeqCst);
        Ok(())
    }
}
