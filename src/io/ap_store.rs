//! Access point coordinate repository
//!
//! Maps canonical access point identifiers to surveyed coordinates. The
//! SQLite table is written only by the `ap-import` tool; at runtime it is
//! opened read-only.
//!
//! `SqliteRepository` is a long-lived handle holding a small pool of idle
//! connections. Each lookup batch runs inside a `RepositorySession`, which
//! takes a connection from the pool and hands it back on drop. Concurrent
//! sessions use separate connections, so queries never wait on each other.

use crate::domain::mac::{canonical_mac, is_canonical};
use crate::domain::types::{AccessPointRecord, Coordinates, Observation, ResolvedAccessPoint};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of stored keys inspected by the normalization self-check
const SELF_CHECK_SAMPLE: usize = 256;

const LOOKUP_SQL: &str = "SELECT lat, lon FROM access_points WHERE mac = ?1";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("access point table unusable in {path}: {reason}")]
    Schema { path: String, reason: String },
}

/// Read-only lookup of surveyed access point coordinates
///
/// Implementations may block (local storage); async callers dispatch through
/// `spawn_blocking`.
pub trait AccessPointRepository: Send + Sync {
    /// Coordinates for an identifier, normalized with `canonical_mac`.
    /// A miss is `Ok(None)`.
    fn lookup(&self, identifier: &str) -> Result<Option<Coordinates>, RepositoryError>;

    /// Resolve a batch of observations in order, dropping misses
    fn resolve(
        &self,
        observations: &[Observation],
    ) -> Result<Vec<ResolvedAccessPoint>, RepositoryError> {
        resolve_each(observations, |mac| self.lookup(mac))
    }
}

fn resolve_each<F>(
    observations: &[Observation],
    mut lookup: F,
) -> Result<Vec<ResolvedAccessPoint>, RepositoryError>
where
    F: FnMut(&str) -> Result<Option<Coordinates>, RepositoryError>,
{
    let mut resolved = Vec::with_capacity(observations.len());
    for obs in observations {
        let mac = canonical_mac(&obs.mac);
        match lookup(&mac)? {
            Some(coords) => resolved.push(ResolvedAccessPoint { mac, coords, rssi: obs.rssi }),
            None => debug!(mac = %mac, rssi = obs.rssi, "ap_unresolved"),
        }
    }
    Ok(resolved)
}

/// Result of sampling stored keys for canonical form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationReport {
    pub sampled: usize,
    pub non_canonical: usize,
    pub example: Option<String>,
}

/// SQLite-backed repository (`access_points(mac, lat, lon, ...)`)
pub struct SqliteRepository {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
}

impl SqliteRepository {
    /// Open an existing database read-only, verify the schema and run the
    /// normalization self-check.
    pub fn open<P: AsRef<Path>>(path: P, max_idle: usize) -> Result<Self, RepositoryError> {
        let repo = Self {
            path: path.as_ref().to_path_buf(),
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle: max_idle.max(1),
        };

        {
            let session = repo.session()?;
            session.verify_schema()?;
            let rows = session.count()?;
            let report = session.normalization_check(SELF_CHECK_SAMPLE)?;

            info!(
                path = %repo.path.display(),
                rows = rows,
                max_idle = repo.max_idle,
                "ap_repository_opened"
            );
            if report.non_canonical > 0 {
                warn!(
                    sampled = report.sampled,
                    non_canonical = report.non_canonical,
                    example = ?report.example,
                    "ap_repository_keys_not_canonical: lookups for these entries will miss"
                );
            }
        }

        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, RepositoryError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(&self.path, flags)?)
    }

    /// Acquire a connection for a lookup batch
    pub fn session(&self) -> Result<RepositorySession<'_>, RepositoryError> {
        let pooled = self.idle.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => {
                debug!(path = %self.path.display(), "ap_repository_connection_opened");
                self.connect()?
            }
        };
        Ok(RepositorySession { conn: Some(conn), repo: self })
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn schema_error(&self, reason: impl Into<String>) -> RepositoryError {
        RepositoryError::Schema { path: self.path.display().to_string(), reason: reason.into() }
    }
}

impl AccessPointRepository for SqliteRepository {
    fn lookup(&self, identifier: &str) -> Result<Option<Coordinates>, RepositoryError> {
        self.session()?.lookup(identifier)
    }

    fn resolve(
        &self,
        observations: &[Observation],
    ) -> Result<Vec<ResolvedAccessPoint>, RepositoryError> {
        let session = self.session()?;
        resolve_each(observations, |mac| session.lookup(mac))
    }
}

/// A pooled connection scoped to one lookup batch
pub struct RepositorySession<'a> {
    conn: Option<Connection>,
    repo: &'a SqliteRepository,
}

impl RepositorySession<'_> {
    fn conn(&self) -> &Connection {
        // Only taken in Drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!("session used after release"))
    }

    pub fn lookup(&self, identifier: &str) -> Result<Option<Coordinates>, RepositoryError> {
        let key = canonical_mac(identifier);
        let mut stmt = self.conn().prepare_cached(LOOKUP_SQL)?;
        let coords = stmt
            .query_row(params![key], |row| Ok(Coordinates::new(row.get(0)?, row.get(1)?)))
            .optional()?;
        Ok(coords)
    }

    fn verify_schema(&self) -> Result<(), RepositoryError> {
        self.conn()
            .prepare("SELECT mac, lat, lon FROM access_points LIMIT 1")
            .map(|_| ())
            .map_err(|e| self.repo.schema_error(e.to_string()))
    }

    pub fn count(&self) -> Result<u64, RepositoryError> {
        let rows: i64 =
            self.conn().query_row("SELECT COUNT(*) FROM access_points", [], |row| row.get(0))?;
        Ok(rows.max(0) as u64)
    }

    /// Sample stored keys and count those not in canonical form
    pub fn normalization_check(&self, sample: usize) -> Result<NormalizationReport, RepositoryError> {
        let mut stmt = self.conn().prepare("SELECT mac FROM access_points LIMIT ?1")?;
        let keys = stmt.query_map(params![sample as i64], |row| row.get::<_, String>(0))?;

        let mut report = NormalizationReport::default();
        for key in keys {
            let key = key?;
            report.sampled += 1;
            if !is_canonical(&key) {
                report.non_canonical += 1;
                report.example.get_or_insert(key);
            }
        }
        Ok(report)
    }
}

impl Drop for RepositorySession<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.repo.release(conn);
        }
    }
}

/// Hash-map repository for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    entries: FxHashMap<String, Coordinates>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or overwrite) an entry under its canonical key
    pub fn insert(&mut self, identifier: &str, coords: Coordinates) {
        self.entries.insert(canonical_mac(identifier), coords);
    }

    pub fn with(mut self, identifier: &str, lat: f64, lon: f64) -> Self {
        self.insert(identifier, Coordinates::new(lat, lon));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<AccessPointRecord> for InMemoryRepository {
    fn from_iter<I: IntoIterator<Item = AccessPointRecord>>(iter: I) -> Self {
        let mut repo = Self::new();
        for record in iter {
            repo.insert(&record.mac, record.coords);
        }
        repo
    }
}

impl AccessPointRepository for InMemoryRepository {
    fn lookup(&self, identifier: &str) -> Result<Option<Coordinates>, RepositoryError> {
        Ok(self.entries.get(&canonical_mac(identifier)).copied())
    }
}
