//! SQLite record of executed runs.

use std::sync::{Mutex, MutexGuard};

use cadence_scheduler::{RunOutcome, RunReport, RunTrigger};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;

/// Initialise the history schema in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id           TEXT    NOT NULL PRIMARY KEY,
            trigger      TEXT    NOT NULL,   -- scheduled | manual
            started_at   TEXT    NOT NULL,   -- RFC 3339, UTC
            finished_at  TEXT    NOT NULL,
            outcome      TEXT    NOT NULL,   -- succeeded | failed
            attempts     INTEGER NOT NULL,
            error        TEXT                -- last error of a failed run
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs (started_at);
        ",
    )?;
    Ok(())
}

/// One row of the `runs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub trigger: RunTrigger,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: String,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Run log. The connection is mutex-guarded so the router future is `Send`.
pub struct RunHistory {
    conn: Mutex<Connection>,
}

impl RunHistory {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("history connection poisoned")
    }

    /// Store a report and return the new row id. Skipped runs are not stored.
    pub fn record(&self, report: &RunReport) -> Result<Option<String>> {
        let (outcome, attempts, error) = match &report.outcome {
            RunOutcome::Succeeded { attempts } => ("succeeded", *attempts, None),
            RunOutcome::Failed {
                attempts,
                last_error,
            } => ("failed", *attempts, Some(last_error.as_str())),
            RunOutcome::Skipped => return Ok(None),
        };

        let id = uuid::Uuid::now_v7().to_string();
        self.conn().execute(
            "INSERT INTO runs (id, trigger, started_at, finished_at, outcome, attempts, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                report.trigger.to_string(),
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
                outcome,
                attempts,
                error,
            ],
        )?;
        Ok(Some(id))
    }

    /// Most recent runs first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, trigger, started_at, finished_at, outcome, attempts, error
             FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;

        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,         // id
                    row.get::<_, String>(1)?,         // trigger
                    row.get::<_, String>(2)?,         // started_at
                    row.get::<_, String>(3)?,         // finished_at
                    row.get::<_, String>(4)?,         // outcome
                    row.get::<_, u32>(5)?,            // attempts
                    row.get::<_, Option<String>>(6)?, // error
                ))
            })?
            .filter_map(|r| {
                let (id, trigger, started_at, finished_at, outcome, attempts, error) = r.ok()?;
                let trigger: RunTrigger = trigger.parse().ok()?;
                Some(HistoryEntry {
                    id,
                    trigger,
                    started_at,
                    finished_at,
                    outcome,
                    attempts,
                    error,
                })
            })
            .collect();

        Ok(entries)
    }
}
