//! Append-only history and idempotency-key operations for the SQLite repository.
//!
//! History records live in `project_history` as JSON, one row per record, in
//! commit order. Rows are only ever inserted.

use infratrack_core::{HistoryKind, HistoryRecord, Page, PageRequest, Pagination, ProjectId};
use rusqlite::{params, Transaction};

use super::super::RepositoryError;
use super::{lock_conn, sqlite_error, usize_to_i64, SqliteRepository};

/// Insert one row per appended record, preserving their order.
pub(super) fn append_records(
    tx: &Transaction<'_>,
    project_id: &ProjectId,
    project_version: i64,
    records: &[HistoryRecord],
) -> Result<(), RepositoryError> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO project_history (project_id, record_id, kind, record_json, project_version, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(|e| sqlite_error("append history", e))?;

    for record in records {
        let record_json = serde_json::to_string(record)
            .map_err(|e| RepositoryError::storage("serialize history record", e.to_string()))?;
        stmt.execute(params![
            project_id.0,
            record.id().to_string(),
            record.kind().as_str(),
            record_json,
            project_version,
            record.recorded_at().timestamp_millis()
        ])
        .map_err(|e| sqlite_error("append history", e))?;
    }
    Ok(())
}

pub(super) fn operation_key_exists(
    tx: &Transaction<'_>,
    project_id: &ProjectId,
    key: &str,
) -> Result<bool, RepositoryError> {
    tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM operation_keys WHERE project_id = ?1 AND operation_key = ?2)",
        params![project_id.0, key],
        |row| row.get(0),
    )
    .map_err(|e| sqlite_error("check operation key", e))
}

pub(super) fn record_operation_key(
    tx: &Transaction<'_>,
    project_id: &ProjectId,
    key: &str,
    project_version: i64,
    recorded_at: i64,
) -> Result<(), RepositoryError> {
    tx.execute(
        "INSERT INTO operation_keys (project_id, operation_key, project_version, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![project_id.0, key, project_version, recorded_at],
    )
    .map_err(|e| sqlite_error("record operation key", e))?;
    Ok(())
}

/// Safely convert an i64 count from SQLite to usize.
fn i64_to_count(value: i64) -> Result<usize, RepositoryError> {
    usize::try_from(value)
        .map_err(|_| RepositoryError::corruption(format!("history count {}", value)))
}

// =============================================================================
// Async implementations
// =============================================================================

impl SqliteRepository {
    pub(super) async fn is_operation_applied_impl(
        &self,
        id: &ProjectId,
        key: &str,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let project_id = id.0.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "is_operation_applied")?;
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM operation_keys WHERE project_id = ?1 AND operation_key = ?2)",
                params![project_id, key],
                |row| row.get(0),
            )
            .map_err(|e| sqlite_error("is_operation_applied", e))
        })
        .await
        .map_err(|e| RepositoryError::storage("is_operation_applied", e.to_string()))?
    }

    pub(super) async fn history_page_impl(
        &self,
        id: &ProjectId,
        kind: HistoryKind,
        request: PageRequest,
    ) -> Result<Page<HistoryRecord>, RepositoryError> {
        let conn = self.conn.clone();
        let project_id = id.clone();
        let limit = usize_to_i64(request.page_size(), "history_page")?;
        let offset = usize_to_i64(request.offset(), "history_page")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "history_page")?;

            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM projects WHERE project_id = ?1)",
                    params![project_id.0],
                    |row| row.get(0),
                )
                .map_err(|e| sqlite_error("history_page", e))?;
            if !exists {
                return Err(RepositoryError::NotFound(project_id));
            }

            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM project_history WHERE project_id = ?1 AND kind = ?2",
                    params![project_id.0, kind.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| sqlite_error("history_page count", e))?;

            let mut stmt = conn
                .prepare(
                    "SELECT record_json FROM project_history
                     WHERE project_id = ?1 AND kind = ?2
                     ORDER BY id DESC
                     LIMIT ?3 OFFSET ?4",
                )
                .map_err(|e| sqlite_error("history_page", e))?;
            let rows = stmt
                .query_map(params![project_id.0, kind.as_str(), limit, offset], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| sqlite_error("history_page", e))?;

            let mut records = Vec::new();
            for row in rows {
                let json = row.map_err(|e| sqlite_error("history_page", e))?;
                let record: HistoryRecord = serde_json::from_str(&json)
                    .map_err(|_| RepositoryError::corruption("history record JSON"))?;
                records.push(record);
            }

            Ok(Page {
                records,
                pagination: Pagination::new(request, i64_to_count(total)?),
            })
        })
        .await
        .map_err(|e| RepositoryError::storage("history_page", e.to_string()))?
    }
}
