//! Workflow bookkeeping rows
//!
//! One row per workflow run: inserted when the run starts, updated when it
//! completes or fails. The orchestrator treats every store error as
//! non-fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::{DualAiError, Result};
use crate::validator::ValidationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Approved,
    NeedsRevision,
    Rejected,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "approved" => Some(Self::Approved),
            "needs_revision" => Some(Self::NeedsRevision),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl From<ValidationStatus> for RunStatus {
    fn from(status: ValidationStatus) -> Self {
        match status {
            ValidationStatus::Approved => Self::Approved,
            ValidationStatus::NeedsRevision => Self::NeedsRevision,
            ValidationStatus::Rejected => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub request_id: String,
    pub content_type: String,
    pub status: RunStatus,
    pub confidence: Option<f64>,
    pub iterations: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn started(id: &str, request_id: &str, content_type: &str) -> Self {
        Self {
            id: id.to_string(),
            request_id: request_id.to_string(),
            content_type: content_type.to_string(),
            status: RunStatus::Running,
            confidence: None,
            iterations: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

pub trait WorkflowStore: Send + Sync {
    fn record_started(&self, run: &WorkflowRun) -> Result<()>;
    fn record_completed(
        &self,
        id: &str,
        status: RunStatus,
        confidence: f64,
        iterations: u32,
    ) -> Result<()>;
    fn record_failed(&self, id: &str, error: &str) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<WorkflowRun>>;
    /// Most recently started runs first
    fn recent(&self, limit: usize) -> Result<Vec<WorkflowRun>>;
}

fn not_found(id: &str) -> DualAiError {
    DualAiError::Storage {
        message: format!("workflow run {} not found", id),
    }
}

pub struct SqliteWorkflowStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_runs (
    id TEXT PRIMARY KEY,
    request_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    status TEXT NOT NULL,
    confidence REAL,
    iterations INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_started ON workflow_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_runs_request ON workflow_runs(request_id);
"#;

impl SqliteWorkflowStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_run(row: &Row<'_>) -> rusqlite::Result<WorkflowRun> {
        let status: String = row.get(3)?;
        let started_at: String = row.get(7)?;
        let completed_at: Option<String> = row.get(8)?;
        Ok(WorkflowRun {
            id: row.get(0)?,
            request_id: row.get(1)?,
            content_type: row.get(2)?,
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
            confidence: row.get(4)?,
            iterations: row.get::<_, i64>(5)?.max(0) as u32,
            error: row.get(6)?,
            started_at: parse_timestamp(&started_at).unwrap_or_default(),
            completed_at: completed_at.as_deref().and_then(parse_timestamp),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

const SELECT_RUN: &str = "SELECT id, request_id, content_type, status, confidence, iterations, \
     error, started_at, completed_at FROM workflow_runs";

impl WorkflowStore for SqliteWorkflowStore {
    fn record_started(&self, run: &WorkflowRun) -> Result<()> {
        self.conn().execute(
            "INSERT INTO workflow_runs (id, request_id, content_type, status, confidence,
                 iterations, error, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.request_id,
                run.content_type,
                run.status.as_str(),
                run.confidence,
                run.iterations as i64,
                run.error,
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn record_completed(
        &self,
        id: &str,
        status: RunStatus,
        confidence: f64,
        iterations: u32,
    ) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE workflow_runs SET status = ?2, confidence = ?3, iterations = ?4,
                 completed_at = ?5 WHERE id = ?1",
            params![
                id,
                status.as_str(),
                confidence,
                iterations as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        if updated == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    fn record_failed(&self, id: &str, error: &str) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE workflow_runs SET status = ?2, error = ?3, completed_at = ?4 WHERE id = ?1",
            params![
                id,
                RunStatus::Failed.as_str(),
                error,
                Utc::now().to_rfc3339()
            ],
        )?;
        if updated == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<WorkflowRun>> {
        let conn = self.conn();
        let run = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_RUN),
                params![id],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn recent(&self, limit: usize) -> Result<Vec<WorkflowRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            SELECT_RUN
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

/// In-process store, used by tests and when no sqlite path is configured
#[derive(Default)]
pub struct MemoryWorkflowStore {
    runs: Mutex<HashMap<String, WorkflowRun>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, WorkflowRun>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    fn record_started(&self, run: &WorkflowRun) -> Result<()> {
        self.runs().insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn record_completed(
        &self,
        id: &str,
        status: RunStatus,
        confidence: f64,
        iterations: u32,
    ) -> Result<()> {
        let mut runs = self.runs();
        let run = runs.get_mut(id).ok_or_else(|| not_found(id))?;
        run.status = status;
        run.confidence = Some(confidence);
        run.iterations = iterations;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    fn record_failed(&self, id: &str, error: &str) -> Result<()> {
        let mut runs = self.runs();
        let run = runs.get_mut(id).ok_or_else(|| not_found(id))?;
        run.status = RunStatus::Failed;
        run.error = Some(error.to_string());
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.runs().get(id).cloned())
    }

    fn recent(&self, limit: usize) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self.runs().values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
