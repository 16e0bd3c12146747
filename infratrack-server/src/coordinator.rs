//! Transactional execution of project mutations.
//!
//! Every mutating call runs as "load → validate and mutate a working copy →
//! append history → commit". The working copy is discarded on any failure, so
//! readers only ever see fully committed states.
//!
//! # Concurrency
//!
//! Calls against the same project are serialized by a per-project lock.
//! Calls against different projects never wait on each other. Because several
//! processes may share one database, the commit is also conditional on the
//! version that was read; a stale commit is retried from a fresh load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use infratrack_core::{EngineError, EngineResult, Project, ProjectId};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::repository::{ProjectCommit, ProjectRepository, RepositoryError};

/// A committed mutation: the project as stored plus whatever the operation returned.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub project: Project,
    pub value: T,
}

pub struct TransactionCoordinator {
    repository: Arc<dyn ProjectRepository>,
    /// Per-project locks serializing load, mutate and commit.
    project_locks: RwLock<HashMap<ProjectId, Arc<Mutex<()>>>>,
    timeout: Duration,
    max_commit_retries: u32,
}

impl TransactionCoordinator {
    pub fn new(
        repository: Arc<dyn ProjectRepository>,
        timeout: Duration,
        max_commit_retries: u32,
    ) -> Self {
        Self {
            repository,
            project_locks: RwLock::new(HashMap::new()),
            timeout,
            max_commit_retries,
        }
    }

    pub fn repository(&self) -> &Arc<dyn ProjectRepository> {
        &self.repository
    }

    fn timeout_error(&self) -> EngineError {
        EngineError::TransactionTimeout {
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn project_lock(&self, id: &ProjectId) -> Arc<Mutex<()>> {
        {
            let locks = self.project_locks.read().await;
            if let Some(lock) = locks.get(id) {
                return lock.clone();
            }
        }

        let mut locks = self.project_locks.write().await;
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for an id that turned out not to exist, unless
    /// another caller is still holding or waiting on it.
    async fn release_lock(&self, id: &ProjectId, lock: Arc<Mutex<()>>) {
        let mut locks = self.project_locks.write().await;
        let idle = locks
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(id);
        }
    }

    /// Store a newly created project.
    pub async fn create(&self, project: Project) -> EngineResult<Project> {
        let deadline = Instant::now() + self.timeout;
        let lock = self.project_lock(project.project_id()).await;
        let _guard = tokio::time::timeout_at(deadline, lock.lock())
            .await
            .map_err(|_| self.timeout_error())?;

        tokio::time::timeout_at(deadline, self.repository.insert(&project))
            .await
            .map_err(|_| self.timeout_error())??;
        info!(project_id = %project.project_id(), "project created");
        Ok(project)
    }

    /// Run `operation` against a working copy of the project and commit the
    /// result atomically.
    ///
    /// `operation` may run more than once if the commit loses a version race,
    /// so it must derive everything from the project it is handed. If
    /// `operation_key` was already committed for this project the call fails
    /// with `DUPLICATE_OPERATION` without running `operation`. If the whole
    /// call cannot finish within the configured timeout it fails with
    /// `TRANSACTION_TIMEOUT` and nothing is written.
    pub async fn with_transaction<T, F>(
        &self,
        project_id: &ProjectId,
        operation_key: Option<&str>,
        operation: F,
    ) -> EngineResult<Committed<T>>
    where
        F: FnMut(&mut Project) -> EngineResult<T> + Send,
        T: Send,
    {
        let lock = self.project_lock(project_id).await;
        let result = self
            .run_locked(&lock, project_id, operation_key, operation)
            .await;
        if matches!(result, Err(EngineError::ProjectNotFound { .. })) {
            self.release_lock(project_id, lock).await;
        }
        result
    }

    async fn run_locked<T, F>(
        &self,
        lock: &Mutex<()>,
        project_id: &ProjectId,
        operation_key: Option<&str>,
        mut operation: F,
    ) -> EngineResult<Committed<T>>
    where
        F: FnMut(&mut Project) -> EngineResult<T> + Send,
        T: Send,
    {
        let deadline = Instant::now() + self.timeout;
        let _guard = match tokio::time::timeout_at(deadline, lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(project_id = %project_id, "timed out waiting for project lock");
                return Err(self.timeout_error());
            }
        };

        if let Some(key) = operation_key {
            let applied = tokio::time::timeout_at(
                deadline,
                self.repository.is_operation_applied(project_id, key),
            )
            .await
            .map_err(|_| self.timeout_error())??;
            if applied {
                info!(project_id = %project_id, key, "duplicate operation ignored");
                return Err(EngineError::DuplicateOperation {
                    project_id: project_id.0.clone(),
                    key: key.to_string(),
                });
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let current = match tokio::time::timeout_at(deadline, self.repository.get(project_id))
                .await
            {
                Ok(loaded) => loaded?.ok_or_else(|| EngineError::ProjectNotFound {
                    project_id: project_id.0.clone(),
                })?,
                Err(_) => {
                    warn!(project_id = %project_id, "timed out loading project");
                    return Err(self.timeout_error());
                }
            };

            let mut working = current.clone();
            let before = working.history_lengths();
            let value = match operation(&mut working) {
                Ok(value) => value,
                Err(e) => {
                    debug!(project_id = %project_id, code = e.code(), "operation rejected");
                    return Err(e);
                }
            };
            let appended = working.records_since(before)?;

            let commit = ProjectCommit {
                expected_version: current.version(),
                project: working.clone(),
                appended,
                operation_key: operation_key.map(str::to_string),
                deadline: Some(deadline.into_std()),
            };
            // Not wrapped in a timeout: the repository enforces the deadline
            // itself so an abandoned commit cannot land later.
            match self.repository.commit(commit).await {
                Ok(version) => {
                    working.mark_committed(version);
                    debug!(project_id = %project_id, version, attempt, "committed");
                    return Ok(Committed {
                        project: working,
                        value,
                    });
                }
                Err(RepositoryError::VersionConflict {
                    expected, actual, ..
                }) if attempt <= self.max_commit_retries => {
                    warn!(
                        project_id = %project_id,
                        expected,
                        actual,
                        attempt,
                        "version conflict, retrying from a fresh load"
                    );
                }
                Err(RepositoryError::DeadlineExceeded { .. }) => {
                    warn!(project_id = %project_id, "commit deadline passed, nothing written");
                    return Err(self.timeout_error());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
