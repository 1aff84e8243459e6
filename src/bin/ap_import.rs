//! ap-import - build the access point database from survey CSV exports
//!
//! Usage:
//!   ap-import --input wigle_data.csv --database wifi_database.db
//!   ap-import --input netids.csv --database wifi_database.db --format netid --keep-first
//!
//! Imports into an existing database unless --fresh is given.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use wifi_locator::io::importer::{import_file, DEFAULT_BATCH_SIZE};
use wifi_locator::io::{DuplicatePolicy, ImportFormat, ImportOptions};

#[derive(Parser, Debug)]
#[command(name = "ap-import", version, about = "Import surveyed access points into SQLite")]
struct Args {
    /// CSV export to read (WiGLE app export or netid/trilat/trilong)
    #[arg(short, long)]
    input: PathBuf,

    /// SQLite database to write
    #[arg(short, long, default_value = "wifi_database.db")]
    database: PathBuf,

    /// Input layout: auto, wigle or netid
    #[arg(short, long, default_value = "auto")]
    format: ImportFormat,

    /// Delete the database before importing
    #[arg(long)]
    fresh: bool,

    /// Keep the first row for a repeated MAC instead of the last
    #[arg(long)]
    keep_first: bool,

    /// Rows per transaction
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let options = ImportOptions {
        format: args.format,
        duplicates: if args.keep_first {
            DuplicatePolicy::KeepFirst
        } else {
            DuplicatePolicy::Replace
        },
        fresh: args.fresh,
        batch_size: args.batch_size,
    };

    info!(
        input = %args.input.display(),
        database = %args.database.display(),
        format = %options.format,
        fresh = options.fresh,
        "import_starting"
    );

    let report = import_file(&args.input, &args.database, &options).with_context(|| {
        format!("importing {} into {}", args.input.display(), args.database.display())
    })?;

    println!("format:     {}", report.format.unwrap_or(ImportFormat::Auto));
    println!("rows read:  {}", report.rows_read);
    println!("imported:   {}", report.imported);
    println!("duplicates: {}", report.duplicates);
    println!("skipped:    {}", report.skipped);
    println!("in table:   {}", report.total_in_database);
    Ok(())
}
