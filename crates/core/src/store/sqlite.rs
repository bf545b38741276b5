//! SQLite-backed gateway store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{BatchStatusRecord, BatchStore, CachedResponse, StoreError};
use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::fingerprint::Fingerprint;
use crate::provider::{BatchStatus, ProviderBatch, RequestCounts};

/// Columns selected for a status log row, in `row_to_status` order.
const STATUS_COLUMNS: &str = "batch_id, status, input_file_id, output_file_id, error_file_id, \
     total_requests, completed_requests, failed_requests, logged_at";

/// Restricts a query to the latest log row of each batch.
const LATEST_ROW_FILTER: &str =
    "l.id = (SELECT MAX(id) FROM batch_status_log WHERE batch_id = l.batch_id)";

/// SQLite-backed store for cached responses and batch statuses.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cached_responses (
                fingerprint TEXT PRIMARY KEY,
                request TEXT NOT NULL,
                response TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );

            -- Append-only: one row per observed provider status
            CREATE TABLE IF NOT EXISTS batch_status_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input_file_id TEXT NOT NULL,
                output_file_id TEXT,
                error_file_id TEXT,
                total_requests INTEGER NOT NULL DEFAULT 0,
                completed_requests INTEGER NOT NULL DEFAULT 0,
                failed_requests INTEGER NOT NULL DEFAULT 0,
                logged_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_batch_status_log_batch_id ON batch_status_log(batch_id, id);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn parse_timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_status(row: &rusqlite::Row) -> rusqlite::Result<BatchStatusRecord> {
        let status: String = row.get(1)?;
        let logged_at: String = row.get(8)?;

        Ok(BatchStatusRecord {
            batch_id: row.get(0)?,
            status: BatchStatus::parse(&status),
            input_file_id: row.get(2)?,
            output_file_id: row.get(3)?,
            error_file_id: row.get(4)?,
            request_counts: RequestCounts {
                total: row.get(5)?,
                completed: row.get(6)?,
                failed: row.get(7)?,
            },
            logged_at: Self::parse_timestamp(&logged_at),
        })
    }
}

impl BatchStore for SqliteStore {
    fn put_cached_response(
        &self,
        fingerprint: &Fingerprint,
        request: &ChatCompletionRequest,
        response: &ChatCompletionResponse,
    ) -> Result<(), StoreError> {
        let request_json =
            serde_json::to_string(request).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let response_json = serde_json::to_string(response)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cached_responses (fingerprint, request, response, cached_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(fingerprint) DO UPDATE SET
                request = excluded.request,
                response = excluded.response,
                cached_at = excluded.cached_at",
            params![
                fingerprint.as_str(),
                request_json,
                response_json,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_cached_response(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<CachedResponse>, StoreError> {
        let row: Option<(String, String, String)> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT request, response, cached_at FROM cached_responses WHERE fingerprint = ?",
                params![fingerprint.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?
        };

        let Some((request_json, response_json, cached_at)) = row else {
            return Ok(None);
        };

        let request: ChatCompletionRequest = serde_json::from_str(&request_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let response: ChatCompletionResponse = serde_json::from_str(&response_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Some(CachedResponse {
            fingerprint: fingerprint.clone(),
            request,
            response,
            cached_at: Self::parse_timestamp(&cached_at),
        }))
    }

    fn count_cached_responses(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM cached_responses", [], |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn log_batch_status(&self, batch: &ProviderBatch) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO batch_status_log (
                batch_id, status, input_file_id, output_file_id, error_file_id,
                total_requests, completed_requests, failed_requests, logged_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                batch.id,
                batch.status.as_str(),
                batch.input_file_id,
                batch.output_file_id,
                batch.error_file_id,
                batch.request_counts.total,
                batch.request_counts.completed,
                batch.request_counts.failed,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_latest_status(&self, batch_id: &str) -> Result<Option<BatchStatusRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM batch_status_log WHERE batch_id = ? ORDER BY id DESC LIMIT 1",
            STATUS_COLUMNS
        );

        conn.query_row(&sql, params![batch_id], Self::row_to_status)
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_latest_statuses(&self, limit: i64) -> Result<Vec<BatchStatusRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM batch_status_log l WHERE {} ORDER BY l.id DESC LIMIT ?",
            STATUS_COLUMNS, LATEST_ROW_FILTER
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], Self::row_to_status)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| StoreError::Database(e.to_string()))?);
        }
        Ok(records)
    }

    fn list_non_terminal_batch_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT l.batch_id FROM batch_status_log l
             WHERE {} AND l.status NOT IN (?, ?, ?, ?)
             ORDER BY l.id ASC",
            LATEST_ROW_FILTER
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(
                params![
                    BatchStatus::Completed.as_str(),
                    BatchStatus::Failed.as_str(),
                    BatchStatus::Expired.as_str(),
                    BatchStatus::Cancelled.as_str(),
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| StoreError::Database(e.to_string()))?);
        }
        Ok(ids)
    }
}
