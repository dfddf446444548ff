use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use sqlx::PgPool;

use crate::{
    db::{CellTable, PgCellStore},
    export::{ExportKind, ExportWindow},
    import::{HeaderMode, OcidClient},
};

mod config;
mod db;
mod export;
mod import;
mod mls;
mod model;
mod tmp;

#[derive(Debug, Parser)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Publish cells as a gzipped CSV file to object storage
    Export {
        /// Export every cell instead of the previous hour
        #[arg(long)]
        full: bool,
        /// Bucket to upload to, instead of the configured one
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Download and import a cell file from OpenCellID
    ImportOcid {
        /// Fetch the full dump instead of the previous hour's diff
        #[arg(long)]
        full: bool,
        #[arg(long)]
        filename: Option<String>,
    },
    /// Import a local gzipped CSV cell file
    ImportFile {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = CellTable::OcidCell)]
        table: CellTable,
        #[arg(long, value_enum, default_value_t = HeaderMode::Detect)]
        header: HeaderMode,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = match cli.config.as_deref() {
        Some(x) => x,
        None => Path::new("config.toml"),
    };
    let config = config::load(path)?;

    let pool = PgPool::connect(&config.database_url).await?;

    match cli.command {
        Command::Migrate => {
            sqlx::migrate!().run(&pool).await?;
            info!("migrations applied");
        }

        Command::Export { full, bucket } => {
            let settings = config.export()?;
            let bucket = export::upload::s3_bucket(
                bucket.as_deref().unwrap_or(&settings.bucket),
                &settings.storage_class,
            )?;
            let kind = if full {
                ExportKind::Full
            } else {
                ExportKind::Diff
            };
            let window = ExportWindow::compute(kind, Utc::now())?;
            let store = PgCellStore::new(pool, CellTable::Cell);
            export::run(&store, bucket.as_ref(), &window, settings.page_size).await?;
        }

        Command::ImportOcid { full, filename } => {
            let ocid = config.ocid()?;
            let client = OcidClient::new(&ocid.url, &ocid.api_key)?;
            let filename = filename.unwrap_or_else(|| import::ocid_filename(full, Utc::now()));
            let store = PgCellStore::new(pool, CellTable::OcidCell);
            import::import_ocid(&store, &client, &filename, ocid.batch_size).await?;
        }

        Command::ImportFile {
            path,
            table,
            header,
        } => {
            let batch_size = config.ocid.as_ref().map_or(import::BATCH_SIZE, |x| x.batch_size);
            let store = PgCellStore::new(pool, table);
            import::import_file(&store, &path, header, batch_size).await?;
        }
    }

    Ok(())
}
