//! Persistence: incidents, glare rescue images, and liveness validation
//! runs (spec §6). Writes are best-effort — a failed write is logged and
//! retried on the next reconciling write rather than aborting the
//! pipeline (spec §7).

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::aggregator::Incident;
use crate::watermark::ValidationReport;

pub trait IncidentStore {
    fn upsert_incident(&mut self, incident: &Incident) -> Result<()>;
    fn record_glare_image(&mut self, incident_id: &str, timestamp: f64, png_bytes: &[u8]) -> Result<()>;
    fn record_liveness_validation(&mut self, source: &str, report: &ValidationReport) -> Result<()>;
}

pub struct SqliteIncidentStore {
    conn: Connection,
}

impl SqliteIncidentStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS incidents (
              id TEXT PRIMARY KEY,
              kind TEXT NOT NULL,
              subtype TEXT,
              first_seen_ts REAL NOT NULL,
              last_seen_ts REAL NOT NULL,
              count INTEGER NOT NULL,
              description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS glare_images (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              incident_id TEXT NOT NULL,
              created_at REAL NOT NULL,
              png_bytes BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS liveness_validations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              source TEXT NOT NULL,
              created_at REAL,
              verdict TEXT NOT NULL,
              match_rate REAL NOT NULL,
              frame_count INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_first_seen ON incidents(first_seen_ts);
            CREATE INDEX IF NOT EXISTS idx_glare_images_incident ON glare_images(incident_id);
            "#,
        )?;
        Ok(())
    }
}

impl IncidentStore for SqliteIncidentStore {
    fn upsert_incident(&mut self, incident: &Incident) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO incidents(id, kind, subtype, first_seen_ts, last_seen_ts, count, description)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
              last_seen_ts = excluded.last_seen_ts,
              count = excluded.count,
              description = excluded.description
            "#,
            params![
                incident.id,
                incident.kind.as_str(),
                incident.subtype,
                incident.first_seen_ts,
                incident.last_seen_ts,
                incident.count,
                incident.description,
            ],
        )?;
        Ok(())
    }

    fn record_glare_image(&mut self, incident_id: &str, timestamp: f64, png_bytes: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO glare_images(incident_id, created_at, png_bytes) VALUES (?1, ?2, ?3)",
            params![incident_id, timestamp, png_bytes],
        )?;
        Ok(())
    }

    fn record_liveness_validation(&mut self, source: &str, report: &ValidationReport) -> Result<()> {
        let verdict = match report.verdict {
            crate::watermark::Verdict::Live => "live",
            crate::watermark::Verdict::NotLive => "not_live",
            crate::watermark::Verdict::Error => "error",
        };
        self.conn.execute(
            r#"
            INSERT INTO liveness_validations(source, created_at, verdict, match_rate, frame_count)
            VALUES (?1, NULL, ?2, ?3, ?4)
            "#,
            params![source, verdict, report.match_rate, report.per_frame.len() as i64],
        )?;
        Ok(())
    }
}
