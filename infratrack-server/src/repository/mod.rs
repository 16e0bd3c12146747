//! Repository abstraction for project persistence.
//!
//! The coordinator talks to storage only through `ProjectRepository`, so the
//! in-memory and SQLite backends are interchangeable.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::time::Instant;

use async_trait::async_trait;
use infratrack_core::{
    EngineError, HistoryKind, HistoryRecord, Page, PageRequest, Project, ProjectId,
};
use thiserror::Error;

/// One validated mutation of a project, ready to be written.
#[derive(Debug, Clone)]
pub struct ProjectCommit {
    /// Version the mutation was computed from. The write only succeeds if the
    /// stored project still has this version.
    pub expected_version: u64,
    pub project: Project,
    /// History records added by the mutation, in append order.
    pub appended: Vec<HistoryRecord>,
    pub operation_key: Option<String>,
    /// The write must not become visible after this instant.
    pub deadline: Option<Instant>,
}

impl ProjectCommit {
    pub fn new_version(&self) -> u64 {
        self.expected_version + 1
    }

    pub(crate) fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    /// The store is busy or unreachable. Safe to retry.
    #[error("storage unavailable during {operation}: {message}")]
    Unavailable { operation: String, message: String },

    #[error("corrupt {what} in storage")]
    Corruption { what: String },

    #[error("project {project_id} is at version {actual}, expected {expected}")]
    VersionConflict {
        project_id: ProjectId,
        expected: u64,
        actual: u64,
    },

    #[error("project {0} already exists")]
    AlreadyExists(ProjectId),

    #[error("project {0} not found")]
    NotFound(ProjectId),

    #[error("operation {key} was already applied to project {project_id}")]
    DuplicateOperation { project_id: ProjectId, key: String },

    #[error("commit deadline passed before {operation} could complete")]
    DeadlineExceeded { operation: String },
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Storage { operation, message } => {
                EngineError::Storage { operation, message }
            }
            RepositoryError::Unavailable { operation, message } => {
                EngineError::StorageUnavailable { operation, message }
            }
            RepositoryError::Corruption { what } => EngineError::Storage {
                operation: "decode".to_string(),
                message: format!("corrupt {}", what),
            },
            RepositoryError::VersionConflict {
                project_id,
                expected,
                actual,
            } => EngineError::VersionConflict {
                project_id: project_id.0,
                expected,
                actual,
            },
            RepositoryError::AlreadyExists(project_id) => EngineError::ProjectExists {
                project_id: project_id.0,
            },
            RepositoryError::NotFound(project_id) => EngineError::ProjectNotFound {
                project_id: project_id.0,
            },
            RepositoryError::DuplicateOperation { project_id, key } => {
                EngineError::DuplicateOperation {
                    project_id: project_id.0,
                    key,
                }
            }
            RepositoryError::DeadlineExceeded { operation } => EngineError::StorageUnavailable {
                operation,
                message: "commit deadline passed".to_string(),
            },
        }
    }
}

/// Storage backend for projects and their append-only history.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Get a project, returning None if not found.
    async fn get(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;

    /// Store a newly created project. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, project: &Project) -> Result<(), RepositoryError>;

    /// Atomically replace a project and append its new history records.
    ///
    /// Either everything in the commit becomes visible or nothing does.
    /// Returns the version assigned to the stored project.
    async fn commit(&self, commit: ProjectCommit) -> Result<u64, RepositoryError>;

    /// Whether `key` was recorded by an earlier commit to this project.
    async fn is_operation_applied(
        &self,
        id: &ProjectId,
        key: &str,
    ) -> Result<bool, RepositoryError>;

    /// A page of one history, most recent first.
    async fn history_page(
        &self,
        id: &ProjectId,
        kind: HistoryKind,
        request: PageRequest,
    ) -> Result<Page<HistoryRecord>, RepositoryError>;

    /// All project ids, sorted.
    async fn list_ids(&self) -> Result<Vec<ProjectId>, RepositoryError>;
}
