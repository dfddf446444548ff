use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use clap::ValueEnum;
use csv::{ErrorKind, StringRecord, Trim};
use flate2::read::MultiGzDecoder;
use log::{debug, warn};

use crate::{db::CellStore, mls, model::CellRecord};

pub const BATCH_SIZE: usize = 10_000;

/// Whether the first record of a file is a header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HeaderMode {
    /// Skip the first record if it looks like a header
    #[default]
    Detect,
    /// Always skip the first record
    Present,
    /// The file starts with data
    Absent,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    /// Rows handed to the store
    pub rows: usize,
    /// Rows rejected by the codec
    pub skipped: usize,
    pub batches: usize,
}

/// Upsert every row of a gzipped CSV file into `store`.
///
/// Rows are applied in file order, `batch_size` at a time, and each batch is
/// committed before the next one is read. A failure part way through leaves
/// the earlier batches in place; importing the same file again converges to
/// the same state.
pub async fn import_cells(
    store: &dyn CellStore,
    path: &Path,
    header: HeaderMode,
    batch_size: usize,
) -> Result<ImportStats> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(MultiGzDecoder::new(BufReader::new(file)));

    let mut stats = ImportStats::default();
    let mut batch = Vec::with_capacity(batch_size);
    let mut record = StringRecord::new();
    let mut headers = None;
    let mut first = true;
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if matches!(e.kind(), ErrorKind::Utf8 { .. }) => {
                stats.skipped += 1;
                warn!("skipping row: {e}");
                continue;
            }
            Err(e) => return Err(e).context("failed to read cell file"),
        }

        if std::mem::take(&mut first) {
            let skip = match header {
                HeaderMode::Detect => mls::is_header(&record),
                HeaderMode::Present => true,
                HeaderMode::Absent => false,
            };
            if skip {
                for name in record.iter() {
                    if mls::Field::from_external_name(name).is_none() {
                        warn!("ignoring unknown column {name:?}");
                    }
                }
                headers = Some(record.clone());
                continue;
            }
        }

        match mls::to_internal_row(&record, headers.as_ref()) {
            Ok(cell) => batch.push(cell),
            Err(e) => {
                stats.skipped += 1;
                let line = record.position().map_or(0, |x| x.line());
                warn!("skipping line {line}: {e}");
                continue;
            }
        }

        if batch.len() >= batch_size {
            flush(store, &mut batch, &mut stats).await?;
        }
    }
    if !batch.is_empty() {
        flush(store, &mut batch, &mut stats).await?;
    }

    Ok(stats)
}

async fn flush(
    store: &dyn CellStore,
    batch: &mut Vec<CellRecord>,
    stats: &mut ImportStats,
) -> Result<()> {
    store
        .upsert(batch.as_slice())
        .await
        .with_context(|| format!("failed to upsert batch {}", stats.batches + 1))?;
    stats.batches += 1;
    stats.rows += batch.len();
    batch.clear();
    debug!("committed batch {} ({} rows so far)", stats.batches, stats.rows);
    Ok(())
}
