//! SQLite implementation of `ProjectRepository`.
//!
//! This provides persistent storage that survives restarts.
//!
//! # Layout
//!
//! - `projects`: one row per project holding the JSON document and its
//!   monotonic `version`. Commits are conditional on the version they read.
//! - `project_history`: every committed history record, append-only. Triggers
//!   abort any UPDATE or DELETE.
//! - `operation_keys`: caller-supplied idempotency keys, written in the same
//!   transaction as the commit they belong to.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! New fields on `Project` must carry `#[serde(default)]` so documents written
//! by older builds still deserialize.

mod history;


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use infratrack_core::{HistoryKind, HistoryRecord, Page, PageRequest, Project, ProjectId};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, warn};

use super::{ProjectCommit, ProjectRepository, RepositoryError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Milliseconds SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// SQLite-backed project repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    /// Exposed as `pub(crate)` so tests can inspect tables directly.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL`, verified after being set
    /// - `synchronous = FULL`
    /// - `busy_timeout = 5000ms`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref).map_err(|e| sqlite_error("open database", e))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently stay in DELETE mode on filesystems without
        // shared memory support, so the result has to be checked. In-memory
        // databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| sqlite_error("set journal_mode", e))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned journal mode '{}' instead of 'wal'. \
                     The project store requires WAL mode.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(&format!(
            "PRAGMA synchronous = FULL; PRAGMA busy_timeout = {};",
            BUSY_TIMEOUT_MS
        ))
        .map_err(|e| sqlite_error("configure pragmas", e))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| sqlite_error("create schema_version table", e))?;

        // 0 if the table is empty, i.e. a fresh database.
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| sqlite_error("get schema version", e))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Version 1: project documents and the append-only history mirror.
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS projects (
                    project_id TEXT PRIMARY KEY,
                    version INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS project_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id TEXT NOT NULL REFERENCES projects(project_id),
                    record_id TEXT NOT NULL UNIQUE,
                    kind TEXT NOT NULL,
                    record_json TEXT NOT NULL,
                    project_version INTEGER NOT NULL,
                    recorded_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_project_history_lookup
                    ON project_history(project_id, kind, id DESC);

                CREATE TRIGGER IF NOT EXISTS project_history_no_update
                    BEFORE UPDATE ON project_history
                BEGIN
                    SELECT RAISE(ABORT, 'project_history is append-only');
                END;

                CREATE TRIGGER IF NOT EXISTS project_history_no_delete
                    BEFORE DELETE ON project_history
                BEGIN
                    SELECT RAISE(ABORT, 'project_history is append-only');
                END;
                "#,
            )
            .map_err(|e| sqlite_error("migration v1", e))?;
        }

        // Version 2: idempotency keys for retried mutations.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS operation_keys (
                    project_id TEXT NOT NULL,
                    operation_key TEXT NOT NULL,
                    project_version INTEGER NOT NULL,
                    recorded_at INTEGER NOT NULL,
                    PRIMARY KEY (project_id, operation_key)
                );
                "#,
            )
            .map_err(|e| sqlite_error("migration v2", e))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| sqlite_error("update schema version", e))?;

        debug!(
            from = from_version,
            to = CURRENT_SCHEMA_VERSION,
            "project store schema migrated"
        );
        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

/// Map a rusqlite error, separating lock contention (retryable) from
/// everything else.
pub(super) fn sqlite_error(operation: &str, err: rusqlite::Error) -> RepositoryError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            RepositoryError::unavailable(operation, err.to_string())
        }
        _ => RepositoryError::storage(operation, err.to_string()),
    }
}

fn lock_conn<'a>(
    conn: &'a Mutex<Connection>,
    operation: &str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

// =============================================================================
// Integer conversion helpers
// =============================================================================

/// Convert a project version to i64 for SQLite storage.
pub(super) fn version_to_i64(version: u64, operation: &str) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!(
                "version {} exceeds maximum storable value ({})",
                version,
                i64::MAX
            ),
        )
    })
}

/// Convert a stored version back to u64. Negative values mean corruption.
pub(super) fn i64_to_version(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::corruption(format!("negative project version {}", value)))
}

/// Convert a usize to i64 for SQLite LIMIT/OFFSET clauses.
pub(super) fn usize_to_i64(value: usize, operation: &str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("{} exceeds maximum storable value ({})", value, i64::MAX),
        )
    })
}

/// Decode a stored project document and check its derived fields.
fn decode_project(json: &str) -> Result<Project, RepositoryError> {
    let project: Project =
        serde_json::from_str(json).map_err(|_| RepositoryError::corruption("project JSON"))?;
    project.check_invariants().map_err(|e| {
        warn!(project_id = %project.project_id(), error = %e, "stored project fails invariants");
        RepositoryError::corruption(format!("project {} document", project.project_id()))
    })?;
    Ok(project)
}

// =============================================================================
// ProjectRepository trait implementation
// =============================================================================

#[async_trait]
impl ProjectRepository for SqliteRepository {
    async fn get(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let conn = self.conn.clone();
        let project_id = id.0.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "get")?;

            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT state_json, version FROM projects WHERE project_id = ?1",
                    params![project_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| sqlite_error("get", e))?;

            match row {
                Some((json, version)) => {
                    let mut project = decode_project(&json)?;
                    // The column is authoritative.
                    project.mark_committed(i64_to_version(version)?);
                    Ok(Some(project))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| RepositoryError::storage("get", e.to_string()))?
    }

    async fn insert(&self, project: &Project) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let project_id = project.project_id().clone();
        let version = version_to_i64(project.version(), "insert")?;
        let status = project.status().label();
        let created_at = project.created_at().timestamp_millis();
        let updated_at = project.updated_at().timestamp_millis();
        let state_json = serde_json::to_string(project)
            .map_err(|e| RepositoryError::storage("serialize project", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "insert")?;

            let inserted = conn
                .execute(
                    "INSERT INTO projects (project_id, version, status, state_json, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(project_id) DO NOTHING",
                    params![project_id.0, version, status, state_json, created_at, updated_at],
                )
                .map_err(|e| sqlite_error("insert", e))?;

            if inserted == 0 {
                return Err(RepositoryError::AlreadyExists(project_id));
            }
            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::storage("insert", e.to_string()))?
    }

    async fn commit(&self, commit: ProjectCommit) -> Result<u64, RepositoryError> {
        let conn = self.conn.clone();
        let new_version = commit.new_version();
        let expected = version_to_i64(commit.expected_version, "commit")?;
        let new_version_i64 = version_to_i64(new_version, "commit")?;

        let mut project = commit.project.clone();
        project.mark_committed(new_version);
        let project_id = project.project_id().clone();
        let status = project.status().label();
        let updated_at = project.updated_at().timestamp_millis();
        let state_json = serde_json::to_string(&project)
            .map_err(|e| RepositoryError::storage("serialize project", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock_conn(&conn, "commit")?;
            let tx = conn
                .transaction()
                .map_err(|e| sqlite_error("begin commit", e))?;

            let actual: Option<i64> = tx
                .query_row(
                    "SELECT version FROM projects WHERE project_id = ?1",
                    params![project_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| sqlite_error("read version", e))?;
            let actual = actual.ok_or_else(|| RepositoryError::NotFound(project_id.clone()))?;
            if actual != expected {
                return Err(RepositoryError::VersionConflict {
                    project_id,
                    expected: commit.expected_version,
                    actual: i64_to_version(actual)?,
                });
            }

            if let Some(key) = &commit.operation_key {
                if history::operation_key_exists(&tx, &project_id, key)? {
                    return Err(RepositoryError::DuplicateOperation {
                        project_id,
                        key: key.clone(),
                    });
                }
            }

            let updated = tx
                .execute(
                    "UPDATE projects
                     SET version = ?1, status = ?2, state_json = ?3, updated_at = ?4
                     WHERE project_id = ?5 AND version = ?6",
                    params![new_version_i64, status, state_json, updated_at, project_id.0, expected],
                )
                .map_err(|e| sqlite_error("update project", e))?;
            if updated != 1 {
                return Err(RepositoryError::VersionConflict {
                    project_id,
                    expected: commit.expected_version,
                    actual: commit.expected_version,
                });
            }

            history::append_records(&tx, &project_id, new_version_i64, &commit.appended)?;
            if let Some(key) = &commit.operation_key {
                history::record_operation_key(&tx, &project_id, key, new_version_i64, updated_at)?;
            }

            // Dropping the transaction rolls it back.
            if commit.deadline_passed() {
                return Err(RepositoryError::DeadlineExceeded {
                    operation: "commit".to_string(),
                });
            }
            tx.commit().map_err(|e| sqlite_error("commit", e))?;
            Ok(new_version)
        })
        .await
        .map_err(|e| RepositoryError::storage("commit", e.to_string()))?
    }

    async fn is_operation_applied(
        &self,
        id: &ProjectId,
        key: &str,
    ) -> Result<bool, RepositoryError> {
        self.is_operation_applied_impl(id, key).await
    }

    async fn history_page(
        &self,
        id: &ProjectId,
        kind: HistoryKind,
        request: PageRequest,
    ) -> Result<Page<HistoryRecord>, RepositoryError> {
        self.history_page_impl(id, kind, request).await
    }

    async fn list_ids(&self) -> Result<Vec<ProjectId>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "list_ids")?;
            let mut stmt = conn
                .prepare("SELECT project_id FROM projects ORDER BY project_id")
                .map_err(|e| sqlite_error("list_ids", e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| sqlite_error("list_ids", e))?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(ProjectId(row.map_err(|e| sqlite_error("list_ids", e))?));
            }
            Ok(ids)
        })
        .await
        .map_err(|e| RepositoryError::storage("list_ids", e.to_string()))?
    }
}
