//! Offline import of survey CSV exports into the `access_points` table
//!
//! Two input layouts are understood:
//! - WiGLE app export: preamble lines, then a `MAC,SSID,...` header with
//!   `CurrentLatitude`/`CurrentLongitude` (some exports spell them
//!   `CurrrentLatitude`/`CurrrentLongitude`)
//! - WiGLE network search export: `netid,...,trilat,trilong,...`
//!
//! NUL bytes are stripped and invalid UTF-8 is replaced before parsing. Rows
//! with an unusable MAC or coordinates are skipped and counted; one bad row
//! never aborts the import. Keys are stored in the form `canonical_mac`
//! produces, which is what the runtime lookup queries with.

use crate::domain::mac::{format_mac, parse_mac};
use crate::domain::types::{AccessPointRecord, Coordinates};
use rusqlite::{params, Connection};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Rows written per transaction
pub const DEFAULT_BATCH_SIZE: usize = 5000;

const WIGLE_HEADER_PREFIX: &str = "MAC,SSID";

pub const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS access_points (
    mac TEXT PRIMARY KEY,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    ssid TEXT,
    first_seen TEXT
)";

const REPLACE_SQL: &str =
    "INSERT OR REPLACE INTO access_points (mac, lat, lon, ssid, first_seen) VALUES (?1, ?2, ?3, ?4, ?5)";
const KEEP_FIRST_SQL: &str =
    "INSERT OR IGNORE INTO access_points (mac, lat, lon, ssid, first_seen) VALUES (?1, ?2, ?3, ?4, ?5)";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{format} input is missing column(s): {}", missing.join(", "))]
    MissingColumns { format: ImportFormat, missing: Vec<&'static str> },

    #[error("could not detect input format (expected a `MAC,SSID` or `netid` header)")]
    UnknownFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    /// Detect from the header
    Auto,
    Wigle,
    Netid,
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportFormat::Auto => "auto",
            ImportFormat::Wigle => "wigle",
            ImportFormat::Netid => "netid",
        })
    }
}

impl FromStr for ImportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ImportFormat::Auto),
            "wigle" => Ok(ImportFormat::Wigle),
            "netid" => Ok(ImportFormat::Netid),
            other => Err(format!("unknown format '{other}' (expected auto, wigle or netid)")),
        }
    }
}

/// What happens when an identifier appears more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Last row wins
    #[default]
    Replace,
    /// First row wins; later rows are counted as duplicates
    KeepFirst,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub format: ImportFormat,
    pub duplicates: DuplicatePolicy,
    /// Delete the database file before importing
    pub fresh: bool,
    pub batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            format: ImportFormat::Auto,
            duplicates: DuplicatePolicy::default(),
            fresh: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Format actually used (never `Auto`)
    pub format: Option<ImportFormat>,
    /// Data rows seen
    pub rows_read: u64,
    /// Rows written to the table
    pub imported: u64,
    /// Rows ignored because the identifier already existed (keep-first only)
    pub duplicates: u64,
    /// Malformed rows
    pub skipped: u64,
    /// Table size after the import
    pub total_in_database: u64,
}

/// Accepted header names per column; the first name is the one reported
/// when the column is missing
struct Layout {
    mac: &'static [&'static str],
    lat: &'static [&'static str],
    lon: &'static [&'static str],
    ssid: &'static [&'static str],
    first_seen: &'static [&'static str],
}

const WIGLE_LAYOUT: Layout = Layout {
    mac: &["MAC"],
    lat: &["CurrentLatitude", "CurrrentLatitude"],
    lon: &["CurrentLongitude", "CurrrentLongitude"],
    ssid: &["SSID"],
    first_seen: &["FirstSeen"],
};

const NETID_LAYOUT: Layout = Layout {
    mac: &["netid"],
    lat: &["trilat"],
    lon: &["trilong"],
    ssid: &["ssid"],
    first_seen: &["firsttime"],
};

/// Column positions for one layout
struct ColumnMap {
    mac: usize,
    lat: usize,
    lon: usize,
    ssid: Option<usize>,
    first_seen: Option<usize>,
}

impl ColumnMap {
    fn from_headers(format: ImportFormat, headers: &csv::StringRecord) -> Result<Self, ImportError> {
        let find = |names: &[&str]| {
            headers.iter().position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };

        let layout = match format {
            ImportFormat::Netid => &NETID_LAYOUT,
            _ => &WIGLE_LAYOUT,
        };
        let (mac_names, lat_names, lon_names) = (layout.mac, layout.lat, layout.lon);
        let (ssid_names, seen_names) = (layout.ssid, layout.first_seen);

        let mac = find(mac_names);
        let lat = find(lat_names);
        let lon = find(lon_names);
        match (mac, lat, lon) {
            (Some(mac), Some(lat), Some(lon)) => Ok(Self {
                mac,
                lat,
                lon,
                ssid: find(ssid_names),
                first_seen: find(seen_names),
            }),
            _ => {
                let missing = [(mac, mac_names[0]), (lat, lat_names[0]), (lon, lon_names[0])]
                    .into_iter()
                    .filter(|(idx, _)| idx.is_none())
                    .map(|(_, name)| name)
                    .collect();
                Err(ImportError::MissingColumns { format, missing })
            }
        }
    }

    /// Turn a CSV row into a record, or `None` if it is malformed
    fn record(&self, row: &csv::StringRecord) -> Option<AccessPointRecord> {
        let octets = parse_mac(row.get(self.mac)?)?;
        let lat: f64 = row.get(self.lat)?.trim().parse().ok()?;
        let lon: f64 = row.get(self.lon)?.trim().parse().ok()?;
        let coords = Coordinates::new(lat, lon);
        if !coords.is_valid() {
            return None;
        }

        let optional = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Some(AccessPointRecord {
            mac: format_mac(&octets),
            coords,
            ssid: optional(self.ssid),
            first_seen: optional(self.first_seen),
        })
    }
}

/// Strip NUL bytes and replace invalid UTF-8
pub fn clean_input(bytes: &[u8]) -> String {
    let without_nul: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
    String::from_utf8_lossy(&without_nul).into_owned()
}

/// Pick the layout and the byte offset where the CSV header starts
fn detect_format(text: &str, requested: ImportFormat) -> Result<(ImportFormat, usize), ImportError> {
    let wigle_header = line_offsets(text).find(|(_, line)| line.starts_with(WIGLE_HEADER_PREFIX));

    match requested {
        ImportFormat::Wigle => Ok((ImportFormat::Wigle, wigle_header.map_or(0, |(off, _)| off))),
        ImportFormat::Netid => Ok((ImportFormat::Netid, 0)),
        ImportFormat::Auto => {
            if let Some((offset, _)) = wigle_header {
                return Ok((ImportFormat::Wigle, offset));
            }
            let first = text.lines().next().unwrap_or_default();
            if first.split(',').any(|h| h.trim().eq_ignore_ascii_case("netid")) {
                Ok((ImportFormat::Netid, 0))
            } else {
                Err(ImportError::UnknownFormat)
            }
        }
    }
}

/// (byte offset, line) pairs
fn line_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line.trim_start_matches('\u{feff}'))
    })
}

/// Create the `access_points` table if it does not exist
pub fn create_schema(conn: &Connection) -> Result<(), ImportError> {
    conn.execute(SCHEMA_SQL, [])?;
    Ok(())
}

/// Import already-cleaned CSV text into an open database
pub fn import_text(
    text: &str,
    conn: &mut Connection,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let (format, offset) = detect_format(text, options.format)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text[offset..].as_bytes());
    let columns = ColumnMap::from_headers(format, reader.headers()?)?;

    create_schema(conn)?;
    let sql = match options.duplicates {
        DuplicatePolicy::Replace => REPLACE_SQL,
        DuplicatePolicy::KeepFirst => KEEP_FIRST_SQL,
    };

    let mut report = ImportReport { format: Some(format), ..ImportReport::default() };
    let batch_size = options.batch_size.max(1);
    let mut batch: Vec<AccessPointRecord> = Vec::with_capacity(batch_size);

    for row in reader.records() {
        report.rows_read += 1;
        let parsed = match row {
            Ok(row) => columns.record(&row),
            Err(e) => {
                debug!(error = %e, row = report.rows_read, "import_row_unreadable");
                None
            }
        };
        match parsed {
            Some(record) => batch.push(record),
            None => report.skipped += 1,
        }

        if batch.len() >= batch_size {
            write_batch(conn, sql, &batch, &mut report)?;
            batch.clear();
            info!(rows_read = report.rows_read, imported = report.imported, "import_progress");
        }
    }
    if !batch.is_empty() {
        write_batch(conn, sql, &batch, &mut report)?;
    }

    report.total_in_database =
        conn.query_row("SELECT COUNT(*) FROM access_points", [], |row| row.get::<_, i64>(0))?
            as u64;
    Ok(report)
}

fn write_batch(
    conn: &mut Connection,
    sql: &str,
    batch: &[AccessPointRecord],
    report: &mut ImportReport,
) -> Result<(), ImportError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(sql)?;
        for record in batch {
            let changed = stmt.execute(params![
                record.mac,
                record.coords.lat,
                record.coords.lon,
                record.ssid,
                record.first_seen,
            ])?;
            if changed == 0 {
                report.duplicates += 1;
            } else {
                report.imported += 1;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

/// Import a CSV file into a SQLite database file
pub fn import_file(
    input: &Path,
    database: &Path,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let bytes = std::fs::read(input)
        .map_err(|source| ImportError::Io { path: input.to_path_buf(), source })?;
    let text = clean_input(&bytes);

    if options.fresh && database.exists() {
        std::fs::remove_file(database)
            .map_err(|source| ImportError::Io { path: database.to_path_buf(), source })?;
        info!(database = %database.display(), "import_database_removed");
    }

    let mut conn = Connection::open(database)?;
    let report = import_text(&text, &mut conn, options)?;

    info!(
        input = %input.display(),
        database = %database.display(),
        format = %report.format.unwrap_or(ImportFormat::Auto),
        rows_read = report.rows_read,
        imported = report.imported,
        duplicates = report.duplicates,
        skipped = report.skipped,
        total = report.total_in_database,
        "import_complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIGLE: &str = "WigleWifi-1.4,appRelease=2.64,model=Pixel\n\
MAC,SSID,AuthMode,FirstSeen,Channel,RSSI,CurrentLatitude,CurrentLongitude,AltitudeMeters,AccuracyMeters,Type\n\
DE:34:AB:01:FF:9C,Cafe,[WPA2],2024-03-01 10:00:00,6,-70,48.8566,2.3522,35,5,WIFI\n\
de-34-ab-01-ff-9d,,[ESS],2024-03-01 10:01:00,11,-80,48.8570,2.3530,35,5,WIFI\n\
not-a-mac,Broken,[ESS],2024-03-01 10:02:00,1,-60,48.0,2.0,35,5,WIFI\n\
aa:bb:cc:dd:ee:ff,Far,[ESS],2024-03-01 10:03:00,1,-60,95.0,2.0,35,5,WIFI\n\
11:22:33:44:55:66,Empty,[ESS],2024-03-01 10:04:00,1,-60,,2.0,35,5,WIFI\n";

    fn memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn lookup(conn: &Connection, mac: &str) -> Option<(f64, f64, Option<String>)> {
        conn.query_row(
            "SELECT lat, lon, ssid FROM access_points WHERE mac = ?1",
            params![mac],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok()
    }

    #[test]
    fn test_wigle_import_skips_malformed_rows() {
        let mut conn = memory_db();
        let report = import_text(WIGLE, &mut conn, &ImportOptions::default()).unwrap();

        assert_eq!(report.format, Some(ImportFormat::Wigle));
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.total_in_database, 2);

        let (lat, lon, ssid) = lookup(&conn, "de:34:ab:01:ff:9c").unwrap();
        assert_eq!((lat, lon), (48.8566, 2.3522));
        assert_eq!(ssid.as_deref(), Some("Cafe"));
        // Blank SSID stored as NULL; dashed MAC canonicalized
        assert_eq!(lookup(&conn, "de:34:ab:01:ff:9d").unwrap().2, None);
    }

    #[test]
    fn test_wigle_typo_columns_and_nul_bytes() {
        let raw = b"MAC,SSID,CurrrentLatitude,CurrrentLongitude\n\
aa:bb:cc:00:11:22,x\0y,10.5,20.25\n";
        let text = clean_input(raw);
        let mut conn = memory_db();
        let report = import_text(&text, &mut conn, &ImportOptions::default()).unwrap();

        assert_eq!(report.imported, 1);
        let (lat, lon, ssid) = lookup(&conn, "aa:bb:cc:00:11:22").unwrap();
        assert_eq!((lat, lon), (10.5, 20.25));
        assert_eq!(ssid.as_deref(), Some("xy"));
    }

    #[test]
    fn test_netid_import() {
        let text = "netid,ssid,trilat,trilong,firsttime\n\
DE:34:AB:01:FF:9C,Home,48.85,2.35,2023-01-01\n\
DE:34:AB:01:FF:9D,Home,abc,2.35,2023-01-01\n";
        let mut conn = memory_db();
        let report = import_text(text, &mut conn, &ImportOptions::default()).unwrap();

        assert_eq!(report.format, Some(ImportFormat::Netid));
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
        assert!(lookup(&conn, "de:34:ab:01:ff:9c").is_some());
    }

    #[test]
    fn test_duplicate_policies() {
        let text = "netid,trilat,trilong\n\
aa:aa:aa:aa:aa:aa,1.0,1.0\n\
AA:AA:AA:AA:AA:AA,2.0,2.0\n";

        let mut conn = memory_db();
        let report = import_text(text, &mut conn, &ImportOptions::default()).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.total_in_database, 1);
        assert_eq!(lookup(&conn, "aa:aa:aa:aa:aa:aa").unwrap().0, 2.0);

        let mut conn = memory_db();
        let options =
            ImportOptions { duplicates: DuplicatePolicy::KeepFirst, ..ImportOptions::default() };
        let report = import_text(text, &mut conn, &options).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(lookup(&conn, "aa:aa:aa:aa:aa:aa").unwrap().0, 1.0);
    }

    #[test]
    fn test_small_batches_commit_everything() {
        let mut text = String::from("netid,trilat,trilong\n");
        for i in 0..25u8 {
            text.push_str(&format!("00:00:00:00:00:{i:02x},{}.0,1.0\n", i % 80));
        }
        let mut conn = memory_db();
        let options = ImportOptions { batch_size: 4, ..ImportOptions::default() };
        let report = import_text(&text, &mut conn, &options).unwrap();
        assert_eq!(report.imported, 25);
        assert_eq!(report.total_in_database, 25);
    }

    #[test]
    fn test_unknown_format() {
        let mut conn = memory_db();
        let err = import_text("a,b,c\n1,2,3\n", &mut conn, &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, ImportError::UnknownFormat));
    }

    #[test]
    fn test_forced_format_missing_columns() {
        let mut conn = memory_db();
        let options = ImportOptions { format: ImportFormat::Netid, ..ImportOptions::default() };
        let err = import_text("netid,lat,lon\n", &mut conn, &options).unwrap_err();
        match err {
            ImportError::MissingColumns { missing, .. } => assert_eq!(missing, vec!["trilat", "trilong"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("WIGLE".parse::<ImportFormat>().unwrap(), ImportFormat::Wigle);
        assert_eq!("netid".parse::<ImportFormat>().unwrap(), ImportFormat::Netid);
        assert!("xml".parse::<ImportFormat>().is_err());
    }
}
