//! Processing history.
//!
//! Every processed upload or RTSP snapshot appends one immutable
//! [`HistoryRecord`]. Stores only support appending and reading everything
//! back in append order; there is no query, deletion or pagination.
//!
//! Stores assume a single writer. The API server owns the only handle and
//! handles requests one at a time.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{HistoryBackend, HistorySettings};

/// One processing event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    /// Sanitized upload name or `RTSP_STREAM`.
    #[serde(rename = "filename")]
    pub source_label: String,
    pub truck_count: u32,
    /// Annotated artifact, empty when none was written.
    pub output_path: String,
}

impl HistoryRecord {
    /// Fresh record with a random UUID and the current local time.
    pub fn new(source_label: &str, truck_count: u32, output_path: Option<&Path>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: crate::now_timestamp(),
            source_label: source_label.to_string(),
            truck_count,
            output_path: output_path.map(display_path).unwrap_or_default(),
        }
    }

    /// Column names, in the order used by reports.
    pub const FIELDS: [&'static str; 5] =
        ["id", "timestamp", "filename", "truck_count", "output_path"];
}

/// Forward-slash rendering of a relative artifact path, as served over HTTP.
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub trait HistoryStore: Send {
    fn append(&mut self, record: &HistoryRecord) -> Result<()>;

    /// Every record in append order; empty when nothing was stored yet.
    fn read_all(&mut self) -> Result<Vec<HistoryRecord>>;
}

/// Open the configured store.
pub fn open_history_store(settings: &HistorySettings) -> Result<Box<dyn HistoryStore>> {
    match settings.backend {
        HistoryBackend::Json => Ok(Box::new(JsonHistoryStore::new(&settings.path))),
        HistoryBackend::Sqlite => Ok(Box::new(SqliteHistoryStore::open(&settings.path)?)),
    }
}

// ----------------------------------------------------------------------------
// JSON array file
// ----------------------------------------------------------------------------

/// History kept as one JSON array file.
///
/// Each append reads the whole array, pushes the record and rewrites the
/// file. The rewrite goes to a sibling temporary file that is renamed over
/// the target, so readers never see a truncated array.
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, records: &[HistoryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut payload = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut payload, formatter);
        records.serialize(&mut serializer)?;

        let mut tmp_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("history path {} has no file name", self.path.display()))?
            .to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, &payload)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&mut self, record: &HistoryRecord) -> Result<()> {
        let mut records = self.read_all()?;
        records.push(record.clone());
        self.write_all(&records)
    }

    fn read_all(&mut self) -> Result<Vec<HistoryRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupt history file {}", self.path.display()))
    }
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

/// History kept in a SQLite table; appends are single-row inserts.
pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open history db {}", db_path.display()))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS history (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              id TEXT NOT NULL UNIQUE,
              timestamp TEXT NOT NULL,
              filename TEXT NOT NULL,
              truck_count INTEGER NOT NULL,
              output_path TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&mut self, record: &HistoryRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO history (id, timestamp, filename, truck_count, output_path) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.timestamp,
                record.source_label,
                record.truck_count,
                record.output_path
            ],
        )?;
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, filename, truck_count, output_path \
             FROM history ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(HistoryRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                source_label: row.get(2)?,
                truck_count: row.get(3)?,
                output_path: row.get(4)?,
            });
        }
        Ok(out)
    }
}
