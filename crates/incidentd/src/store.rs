//! Incident run store over SQLite.
//!
//! The store is the sole source of truth for runs: nothing above it caches
//! run state between operations. One connection sits behind an async mutex
//! and every call runs on the blocking pool; each mutation is its own
//! transaction, so readers only ever see committed rows.

use chrono::{DateTime, Utc};
use incident_shared::{IncidentError, IncidentRun, Result, RunLogs, RunStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "id, scenario_name, status, started_at, ended_at, logs, report_path";

pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

fn storage(err: rusqlite::Error) -> IncidentError {
    IncidentError::Storage(err.to_string())
}

fn run_not_found(id: Uuid) -> IncidentError {
    IncidentError::not_found(format!("Run '{}'", id))
}

/// Columns as stored, before decoding
struct RunRow {
    id: String,
    scenario_name: String,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    logs: Option<String>,
    report_path: Option<String>,
}

impl RunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scenario_name: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            logs: row.get(5)?,
            report_path: row.get(6)?,
        })
    }

    fn decode(self) -> Result<IncidentRun> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| IncidentError::Storage(format!("bad run id '{}': {}", self.id, e)))?;
        let logs = match self.logs {
            Some(json) => serde_json::from_str(&json)?,
            None => RunLogs::default(),
        };
        Ok(IncidentRun {
            id,
            scenario_name: self.scenario_name,
            status: self.status.parse()?,
            started_at: self.started_at,
            ended_at: self.ended_at,
            logs,
            report_path: self.report_path,
        })
    }
}

impl RunStore {
    /// Open or create the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!("Opening run store at {}", path.display());

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS incident_runs (
                    id TEXT PRIMARY KEY,
                    scenario_name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    logs TEXT,
                    report_path TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_runs_started ON incident_runs(started_at)",
                [],
            )?;
            Ok(conn)
        })
        .await
        .map_err(|e| IncidentError::Internal(format!("store open task failed: {}", e)))?
        .map_err(storage)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| IncidentError::Internal(format!("store task failed: {}", e)))?
        .map_err(storage)
    }

    pub async fn create(&self, run: &IncidentRun) -> Result<()> {
        let id = run.id.to_string();
        let scenario = run.scenario_name.clone();
        let status = run.status.as_str();
        let started_at = run.started_at;
        let ended_at = run.ended_at;
        let logs = serde_json::to_string(&run.logs)?;
        let report_path = run.report_path.clone();

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO incident_runs
                 (id, scenario_name, status, started_at, ended_at, logs, report_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, scenario, status, started_at, ended_at, logs, report_path],
            )?;
            tx.commit()
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<IncidentRun> {
        let key = id.to_string();
        let row = self
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM incident_runs WHERE id = ?1", SELECT_COLUMNS),
                    params![key],
                    RunRow::read,
                )
                .optional()
            })
            .await?;
        row.ok_or_else(|| run_not_found(id))?.decode()
    }

    /// Every run, oldest first.
    pub async fn list_all(&self) -> Result<Vec<IncidentRun>> {
        let rows = self
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM incident_runs ORDER BY started_at, id",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], RunRow::read)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RunRow::decode).collect()
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: RunStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let key = id.to_string();
        let changed = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE incident_runs SET status = ?2, ended_at = COALESCE(?3, ended_at)
                     WHERE id = ?1",
                    params![key, status.as_str(), ended_at],
                )?;
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(run_not_found(id));
        }
        Ok(())
    }

    pub async fn attach_report(&self, id: Uuid, path: &str) -> Result<()> {
        let key = id.to_string();
        let path = path.to_string();
        let changed = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE incident_runs SET report_path = ?2 WHERE id = ?1",
                    params![key, path],
                )?;
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(run_not_found(id));
        }
        Ok(())
    }

    /// Write the run's terminal fields only if the stored row is still `Triggered`.
    ///
    /// Returns whether this call won the transition.
    pub async fn finish_if_triggered(&self, run: &IncidentRun) -> Result<bool> {
        let key = run.id.to_string();
        let status = run.status.as_str();
        let ended_at = run.ended_at;
        let logs = serde_json::to_string(&run.logs)?;
        let report_path = run.report_path.clone();

        let changed = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE incident_runs
                     SET status = ?2, ended_at = ?3, logs = ?4, report_path = ?5
                     WHERE id = ?1 AND status = 'Triggered'",
                    params![key, status, ended_at, logs, report_path],
                )?;
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        Ok(changed == 1)
    }

    /// Overwrite the run's mutable fields unconditionally.
    pub async fn save(&self, run: &IncidentRun) -> Result<()> {
        let key = run.id.to_string();
        let status = run.status.as_str();
        let ended_at = run.ended_at;
        let logs = serde_json::to_string(&run.logs)?;
        let report_path = run.report_path.clone();

        let changed = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE incident_runs
                     SET status = ?2, ended_at = ?3, logs = ?4, report_path = ?5
                     WHERE id = ?1",
                    params![key, status, ended_at, logs, report_path],
                )?;
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(run_not_found(run.id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let key = id.to_string();
        let changed = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute("DELETE FROM incident_runs WHERE id = ?1", params![key])?;
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(run_not_found(id));
        }
        Ok(())
    }
}
