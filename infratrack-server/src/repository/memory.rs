//! In-memory implementation of `ProjectRepository`.
//!
//! All state is held in memory and lost on restart. Used by tests and by
//! callers that do not need durability.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use infratrack_core::{
    page_most_recent_first, HistoryKind, HistoryRecord, Page, PageRequest, Project, ProjectId,
};
use tokio::sync::RwLock;

use super::{ProjectCommit, ProjectRepository, RepositoryError};

struct StoredProject {
    project: Project,
    /// Mirror of every committed history record, in commit order.
    history: Vec<HistoryRecord>,
    operation_keys: HashSet<String>,
}

/// In-memory project repository.
///
/// Stores projects in a `HashMap` protected by a `RwLock`. A commit holds the
/// write lock for its whole check-and-replace, which makes it atomic.
pub struct InMemoryRepository {
    projects: RwLock<HashMap<ProjectId, StoredProject>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryRepository {
    async fn get(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let projects = self.projects.read().await;
        Ok(projects.get(id).map(|stored| stored.project.clone()))
    }

    async fn insert(&self, project: &Project) -> Result<(), RepositoryError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(project.project_id()) {
            return Err(RepositoryError::AlreadyExists(project.project_id().clone()));
        }
        projects.insert(
            project.project_id().clone(),
            StoredProject {
                project: project.clone(),
                history: Vec::new(),
                operation_keys: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn commit(&self, commit: ProjectCommit) -> Result<u64, RepositoryError> {
        let mut projects = self.projects.write().await;
        let id = commit.project.project_id().clone();
        let stored = projects
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;

        let actual = stored.project.version();
        if actual != commit.expected_version {
            return Err(RepositoryError::VersionConflict {
                project_id: id,
                expected: commit.expected_version,
                actual,
            });
        }
        if let Some(key) = &commit.operation_key {
            if stored.operation_keys.contains(key) {
                return Err(RepositoryError::DuplicateOperation {
                    project_id: id,
                    key: key.clone(),
                });
            }
        }
        if commit.deadline_passed() {
            return Err(RepositoryError::DeadlineExceeded {
                operation: "commit".to_string(),
            });
        }

        let version = commit.new_version();
        let mut project = commit.project;
        project.mark_committed(version);
        stored.project = project;
        stored.history.extend(commit.appended);
        if let Some(key) = commit.operation_key {
            stored.operation_keys.insert(key);
        }
        Ok(version)
    }

    async fn is_operation_applied(
        &self,
        id: &ProjectId,
        key: &str,
    ) -> Result<bool, RepositoryError> {
        let projects = self.projects.read().await;
        Ok(projects
            .get(id)
            .is_some_and(|stored| stored.operation_keys.contains(key)))
    }

    async fn history_page(
        &self,
        id: &ProjectId,
        kind: HistoryKind,
        request: PageRequest,
    ) -> Result<Page<HistoryRecord>, RepositoryError> {
        let projects = self.projects.read().await;
        let stored = projects
            .get(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        let records: Vec<HistoryRecord> = stored
            .history
            .iter()
            .filter(|record| record.kind() == kind)
            .cloned()
            .collect();
        Ok(page_most_recent_first(&records, request))
    }

    async fn list_ids(&self) -> Result<Vec<ProjectId>, RepositoryError> {
        let projects = self.projects.read().await;
        let mut ids: Vec<ProjectId> = projects.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
