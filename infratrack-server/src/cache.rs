//! Cache for derived project summaries.
//!
//! The cache is injected into the engine, never global. Entries are keyed by
//! project and viewing role, and every commit to a project invalidates all of
//! that project's entries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use infratrack_core::{ProjectId, ProjectSummary, Role};
use tokio::sync::RwLock;

/// Opaque marker of a project's cache state, taken before reading the project.
///
/// A `put` made with a generation older than the latest invalidation is
/// dropped, so a summary computed from a pre-commit read can never be cached
/// after the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeneration(u64);

#[async_trait]
pub trait SummaryCache: Send + Sync {
    async fn get(&self, project_id: &ProjectId, role: Role) -> Option<ProjectSummary>;

    async fn generation(&self, project_id: &ProjectId) -> CacheGeneration;

    async fn put(
        &self,
        project_id: &ProjectId,
        role: Role,
        summary: ProjectSummary,
        generation: CacheGeneration,
    );

    /// Drop every entry for the project.
    async fn invalidate(&self, project_id: &ProjectId);
}

struct CacheEntry {
    summary: ProjectSummary,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(ProjectId, Role), CacheEntry>,
    generations: HashMap<ProjectId, u64>,
}

/// In-process cache with a fixed time-to-live per entry.
pub struct TtlSummaryCache {
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl TtlSummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SummaryCache for TtlSummaryCache {
    async fn get(&self, project_id: &ProjectId, role: Role) -> Option<ProjectSummary> {
        let state = self.state.read().await;
        state
            .entries
            .get(&(project_id.clone(), role))
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.summary.clone())
    }

    async fn generation(&self, project_id: &ProjectId) -> CacheGeneration {
        let state = self.state.read().await;
        CacheGeneration(state.generations.get(project_id).copied().unwrap_or(0))
    }

    async fn put(
        &self,
        project_id: &ProjectId,
        role: Role,
        summary: ProjectSummary,
        generation: CacheGeneration,
    ) {
        let mut state = self.state.write().await;
        let current = state.generations.get(project_id).copied().unwrap_or(0);
        if generation.0 != current {
            return;
        }
        // Expired entries are swept on write.
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, entry| entry.stored_at.elapsed() < ttl);
        state.entries.insert(
            (project_id.clone(), role),
            CacheEntry {
                summary,
                stored_at: Instant::now(),
            },
        );
    }

    async fn invalidate(&self, project_id: &ProjectId) {
        let mut state = self.state.write().await;
        state.entries.retain(|(id, _), _| id != project_id);
        *state.generations.entry(project_id.clone()).or_insert(0) += 1;
    }
}

/// A cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSummaryCache;

#[async_trait]
impl SummaryCache for NoSummaryCache {
    async fn get(&self, _project_id: &ProjectId, _role: Role) -> Option<ProjectSummary> {
        None
    }

    async fn generation(&self, _project_id: &ProjectId) -> CacheGeneration {
        CacheGeneration(0)
    }

    async fn put(
        &self,
        _project_id: &ProjectId,
        _role: Role,
        _summary: ProjectSummary,
        _generation: CacheGeneration,
    ) {
    }

    async fn invalidate(&self, _project_id: &ProjectId) {}
}
