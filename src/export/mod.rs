//! Publish the cell table as gzipped CSV snapshots.
//!
//! An export computes its time window, streams the matching rows into a file
//! inside a scratch workspace, and uploads the finished file. Nothing is
//! uploaded unless the file was written completely, and the workspace is
//! removed however the job ends.

use anyhow::{Context, Result};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use log::info;
use object_store::{path::Path as ObjectPath, ObjectStore};

use crate::{db::CellStore, db::ExportFilter, tmp::Workspace};

pub mod upload;
pub mod write;

pub use write::{ExportStats, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Cells modified during the previous full hour
    Diff,
    /// Every exportable cell
    Full,
}

/// The rows and file name covered by one export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportWindow {
    pub kind: ExportKind,
    pub filter: ExportFilter,
    /// Timestamp encoded in the file name
    pub file_time: DateTime<Utc>,
}

impl ExportWindow {
    pub fn compute(kind: ExportKind, now: DateTime<Utc>) -> Result<Self> {
        Ok(match kind {
            ExportKind::Diff => {
                let end = now.duration_trunc(TimeDelta::hours(1))?;
                Self {
                    kind,
                    filter: ExportFilter {
                        modified_since: Some(end - TimeDelta::hours(1)),
                        modified_before: Some(end),
                    },
                    file_time: end,
                }
            }
            ExportKind::Full => Self {
                kind,
                filter: ExportFilter::default(),
                file_time: now.duration_trunc(TimeDelta::days(1))?,
            },
        })
    }

    pub fn filename(&self) -> String {
        let marker = match self.kind {
            ExportKind::Diff => "diff",
            ExportKind::Full => "full",
        };
        format!(
            "MLS-{marker}-cell-export-{}.csv.gz",
            self.file_time.format("%Y-%m-%dT%H0000")
        )
    }
}

#[derive(Debug)]
pub struct ExportReport {
    pub key: ObjectPath,
    pub stats: ExportStats,
}

pub async fn run(
    store: &dyn CellStore,
    bucket: &dyn ObjectStore,
    window: &ExportWindow,
    page_size: usize,
) -> Result<ExportReport> {
    let filename = window.filename();
    info!("exporting {filename}");

    let workspace = Workspace::acquire()?;
    let path = workspace.file(&filename);
    let stats = write::write_cells(store, &window.filter, &path, page_size)
        .await
        .with_context(|| format!("failed to write {filename}"))?;
    info!("wrote {} cells in {} pages", stats.rows, stats.pages);

    let key = upload::upload(bucket, &path)
        .await
        .with_context(|| format!("failed to upload {filename}"))?;
    workspace.close()?;
    info!("uploaded {key}");

    Ok(ExportReport { key, stats })
}
