use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::{write::GzEncoder, Compression};
use log::debug;

use crate::{
    db::{CellStore, ExportFilter},
    mls,
    model::CellRecord,
};

pub const PAGE_SIZE: usize = 10_000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportStats {
    /// Non-empty pages fetched from the store
    pub pages: usize,
    pub rows: usize,
}

/// Write every row matching `filter` to a gzipped CSV file at `path`.
///
/// Rows are fetched `page_size` at a time in primary key order, so memory use
/// does not depend on the size of the table.
pub async fn write_cells(
    store: &dyn CellStore,
    filter: &ExportFilter,
    path: &Path,
    page_size: usize,
) -> Result<ExportStats> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut writer = csv::Writer::from_writer(encoder);
    writer.write_record(&mls::header())?;

    let mut stats = ExportStats::default();
    let limit = i64::try_from(page_size)?;
    let mut offset = 0;
    loop {
        let page = store.fetch_page(filter, limit, offset).await?;
        if page.is_empty() {
            break;
        }
        stats.pages += 1;
        offset += limit;

        for row in page {
            let record = CellRecord::try_from(row)
                .with_context(|| format!("cannot export row {}", stats.rows + 1))?;
            writer.write_record(&mls::to_external_row(&record))?;
            stats.rows += 1;
        }
        debug!("wrote page {} ({} rows so far)", stats.pages, stats.rows);
    }

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?.flush()?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::{io::Read, sync::atomic::Ordering};

    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;

    use super::*;
    use crate::{
        db::memory::MemoryCellStore,
        model::{CellRow, Radio, LAC_AGGREGATE_CID},
        tmp::Workspace,
    };

    fn row(cid: i64) -> CellRow {
        CellRow {
            radio: Radio::Lte.code(),
            mcc: 262,
            mnc: 3,
            lac: 7,
            cid,
            psc: -1,
            lat: Some(50.0),
            lon: Some(8.0),
            range: 300,
            samples: 4,
            changeable: true,
            created: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            modified: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        let mut text = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text.lines().map(str::to_owned).collect()
    }

    #[tokio::test]
    async fn paginates_in_order() {
        let store = MemoryCellStore::default();
        for cid in 1..=25 {
            store.insert_row(row(cid));
        }
        let workspace = Workspace::acquire().unwrap();
        let path = workspace.file("out.csv.gz");

        let stats = write_cells(&store, &ExportFilter::default(), &path, 10)
            .await
            .unwrap();
        assert_eq!(stats, ExportStats { pages: 3, rows: 25 });
        // the final empty page ends the stream
        assert_eq!(store.pages.load(Ordering::SeqCst), 4);
        assert_eq!(store.largest_page.load(Ordering::SeqCst), 10);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 26);
        assert_eq!(
            lines[0],
            "radio,mcc,net,area,cell,unit,lon,lat,range,samples,changeable,created,updated,averageSignal"
        );
        assert_eq!(lines[1], "LTE,262,3,7,1,,8,50,300,4,1,1700000000,1700000000,");
        let cids: Vec<i64> = lines[1..]
            .iter()
            .map(|x| x.split(',').nth(4).unwrap().parse().unwrap())
            .collect();
        assert_eq!(cids, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn header_only_when_empty() {
        let store = MemoryCellStore::default();
        let mut aggregate = row(LAC_AGGREGATE_CID);
        aggregate.lat = Some(1.0);
        store.insert_row(aggregate);
        let mut unpositioned = row(5);
        unpositioned.lat = None;
        store.insert_row(unpositioned);

        let workspace = Workspace::acquire().unwrap();
        let path = workspace.file("empty.csv.gz");
        let stats = write_cells(&store, &ExportFilter::default(), &path, 10)
            .await
            .unwrap();
        assert_eq!(stats, ExportStats::default());
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[tokio::test]
    async fn unknown_radio_code_fails() {
        let store = MemoryCellStore::default();
        store.insert_row(row(1));
        let mut broken = row(2);
        broken.radio = 9;
        store.insert_row(broken);

        let workspace = Workspace::acquire().unwrap();
        let path = workspace.file("broken.csv.gz");
        let err = write_cells(&store, &ExportFilter::default(), &path, 10)
            .await
            .unwrap_err();
        assert!(err
            .chain()
            .any(|x| x.to_string() == "radio code 9 has no known radio type"));
    }
}
