//! Load cell snapshots published by OpenCellID or by another export.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use log::info;

use crate::{db::CellStore, tmp::Workspace};

pub mod fetch;
pub mod read;

pub use fetch::OcidClient;
pub use read::{HeaderMode, ImportStats, BATCH_SIZE};

const OCID_FULL_FILENAME: &str = "cell_towers.csv.gz";

/// Name of the provider file to fetch when none was given explicitly.
///
/// Hourly diffs are named after the hour before `now`.
pub fn ocid_filename(full: bool, now: DateTime<Utc>) -> String {
    if full {
        OCID_FULL_FILENAME.to_owned()
    } else {
        let previous = now - TimeDelta::hours(1);
        previous.format("cell_towers_diff-%Y%m%d%H.csv.gz").to_string()
    }
}

/// Download a provider file into a scratch workspace and import it.
pub async fn import_ocid(
    store: &dyn CellStore,
    client: &OcidClient,
    filename: &str,
    batch_size: usize,
) -> Result<ImportStats> {
    // the name comes from the command line, keep it inside the workspace
    let local_name = Path::new(filename)
        .file_name()
        .and_then(|x| x.to_str())
        .with_context(|| format!("invalid file name {filename:?}"))?;

    let workspace = Workspace::acquire()?;
    let path = workspace.file(local_name);
    info!("downloading {filename}");
    let size = client
        .download(filename, &path)
        .await
        .with_context(|| format!("failed to download {filename}"))?;
    info!("downloaded {filename} ({size} bytes)");

    let stats = import_file(store, &path, HeaderMode::Detect, batch_size).await?;
    workspace.close()?;

    Ok(stats)
}

/// Import a file that is already on disk.
pub async fn import_file(
    store: &dyn CellStore,
    path: &Path,
    header: HeaderMode,
    batch_size: usize,
) -> Result<ImportStats> {
    info!("importing {}", path.display());
    let stats = read::import_cells(store, path, header, batch_size)
        .await
        .with_context(|| format!("failed to import {}", path.display()))?;
    info!(
        "imported {} cells in {} batches, skipped {} rows",
        stats.rows, stats.batches, stats.skipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Read};

    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use object_store::{memory::InMemory, ObjectStore};

    use super::*;
    use crate::{
        db::memory::MemoryCellStore,
        export::{self, ExportKind, ExportWindow},
        model::{CellRecord, CellRow, Radio},
    };

    #[test]
    fn filenames() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap();
        assert_eq!(
            ocid_filename(false, now),
            "cell_towers_diff-2024043023.csv.gz"
        );
        assert_eq!(ocid_filename(true, now), "cell_towers.csv.gz");
    }

    #[tokio::test]
    async fn export_then_import() {
        let created = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap();
        let originals = [
            CellRecord {
                radio: Radio::Gsm,
                mcc: 100,
                mnc: 1,
                lac: 1,
                cid: 1,
                psc: -1,
                lat: 1.0,
                lon: 2.0,
                range: 1000,
                samples: 3,
                changeable: true,
                created,
                modified,
            },
            CellRecord {
                radio: Radio::Lte,
                mcc: 100,
                mnc: 1,
                lac: 2,
                cid: 2,
                psc: -1,
                lat: 3.0,
                lon: 4.0,
                range: 500,
                samples: 1,
                changeable: true,
                created,
                modified,
            },
        ];
        let source = MemoryCellStore::default();
        for record in &originals {
            source.insert_row(CellRow::from(record));
        }

        let bucket = InMemory::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let window = ExportWindow::compute(ExportKind::Full, now).unwrap();
        let report = export::run(&source, &bucket, &window, export::PAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(report.stats.rows, 2);

        let workspace = Workspace::acquire().unwrap();
        let path = workspace.file(&window.filename());
        let bytes = bucket.get(&report.key).await.unwrap().bytes().await.unwrap();
        fs::write(&path, &bytes).unwrap();

        let mut text = String::new();
        GzDecoder::new(bytes.as_ref())
            .read_to_string(&mut text)
            .unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("GSM,100,1,"));
        assert!(lines[2].starts_with("LTE,100,1,"));

        let target = MemoryCellStore::default();
        let stats = import_file(&target, &path, HeaderMode::Detect, BATCH_SIZE)
            .await
            .unwrap();
        assert_eq!(stats, ImportStats { rows: 2, skipped: 0, batches: 1 });
        assert_eq!(target.records(), originals);
    }
}
