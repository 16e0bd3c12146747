//! The engine interface used by request handlers.
//!
//! `ProjectEngine` binds the pure lifecycle and ledger operations to a
//! repository through the transaction coordinator. Handlers pass in an
//! already-authenticated actor and already-uploaded documents; the engine
//! returns the committed project together with the record the call produced.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use infratrack_core::ledger::set_updates_enabled;
use infratrack_core::{
    advisories_at, apply_combined_update, apply_financial_update, apply_progress_update,
    change_status, project_summary, set_editable, Actor, Advisory, ClientInfo, CombinedOutcome,
    CombinedUpdate, EditableStatusHistoryEntry, EngineError, EngineResult, FinancialUpdate,
    FinancialUpdateRecord, HistoryKind, HistoryRecord, LedgerKind, NewProject, Page,
    PageRequest, ProgressOutcome, ProgressUpdate, ProgressUpdateRecord, Project, ProjectId,
    ProjectSummary, Role, StatusChange, StatusHistoryEntry,
};
use serde::Serialize;
use tracing::info;

use crate::cache::{SummaryCache, TtlSummaryCache};
use crate::coordinator::{Committed, TransactionCoordinator};
use crate::repository::{InMemoryRepository, ProjectRepository, RepositoryError, SqliteRepository};

/// Source of "now" for record timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub transaction_timeout: Duration,
    pub max_commit_retries: u32,
    pub cache_ttl: Duration,
    /// Local offset of project sites, used for weekend and off-hours advisories.
    pub workday_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(5),
            max_commit_retries: 3,
            cache_ttl: Duration::from_secs(300),
            workday_offset: Utc.fix(),
        }
    }
}

/// Who is calling, from where, and an optional idempotency key.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub actor: Actor,
    pub client: ClientInfo,
    pub operation_key: Option<String>,
}

impl CallContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            client: ClientInfo::default(),
            operation_key: None,
        }
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_operation_key(mut self, key: impl Into<String>) -> Self {
        self.operation_key = Some(key.into());
        self
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation<T> {
    pub project: Project,
    pub result: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<Advisory>,
}

pub struct ProjectEngine {
    coordinator: TransactionCoordinator,
    cache: Arc<dyn SummaryCache>,
    workday_offset: FixedOffset,
    clock: Clock,
}

impl ProjectEngine {
    pub fn new(
        repository: Arc<dyn ProjectRepository>,
        cache: Arc<dyn SummaryCache>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(
                repository,
                settings.transaction_timeout,
                settings.max_commit_retries,
            ),
            cache,
            workday_offset: settings.workday_offset,
            clock: Arc::new(Utc::now),
        }
    }

    /// Engine over an in-memory store with a TTL summary cache.
    pub fn in_memory(settings: EngineSettings) -> Self {
        let cache = Arc::new(TtlSummaryCache::new(settings.cache_ttl));
        Self::new(Arc::new(InMemoryRepository::new()), cache, settings)
    }

    /// Engine over the SQLite store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, settings: EngineSettings) -> Result<Self, RepositoryError> {
        let repository = SqliteRepository::new(path)?;
        let cache = Arc::new(TtlSummaryCache::new(settings.cache_ttl));
        Ok(Self::new(Arc::new(repository), cache, settings))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Run a mutation through the coordinator, invalidating cached summaries
    /// for the project once it commits.
    async fn mutate<T, F>(
        &self,
        action: &'static str,
        project_id: &ProjectId,
        ctx: &CallContext,
        mut op: F,
    ) -> EngineResult<Committed<T>>
    where
        F: FnMut(&mut Project, DateTime<Utc>) -> EngineResult<T> + Send,
        T: Send,
    {
        let clock = &self.clock;
        let result = self
            .coordinator
            .with_transaction(project_id, ctx.operation_key.as_deref(), |project| {
                op(project, clock())
            })
            .await;

        match result {
            Ok(committed) => {
                self.cache.invalidate(project_id).await;
                info!(
                    project_id = %project_id,
                    action,
                    by = %ctx.actor.user_id,
                    role = %ctx.actor.role,
                    version = committed.project.version(),
                    "committed"
                );
                Ok(committed)
            }
            Err(e) => {
                info!(
                    project_id = %project_id,
                    action,
                    by = %ctx.actor.user_id,
                    code = e.code(),
                    error = %e,
                    "rejected"
                );
                Err(e)
            }
        }
    }

    fn plain<T>(committed: Committed<T>) -> Mutation<T> {
        Mutation {
            project: committed.project,
            result: committed.value,
            advisories: Vec::new(),
        }
    }

    fn advised<T>(&self, committed: Committed<T>) -> Mutation<T> {
        let advisories = advisories_at(committed.project.updated_at(), self.workday_offset);
        Mutation {
            project: committed.project,
            result: committed.value,
            advisories,
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn create_project(&self, new: NewProject, ctx: &CallContext) -> EngineResult<Project> {
        let project = Project::create(new, &ctx.actor, self.now())?;
        self.coordinator.create(project).await
    }

    pub async fn change_status(
        &self,
        project_id: &ProjectId,
        change: StatusChange,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<StatusHistoryEntry>> {
        let committed = self
            .mutate("change status", project_id, ctx, |project, now| {
                change_status(project, &change, &ctx.actor, &ctx.client, now)
            })
            .await?;
        Ok(Self::plain(committed))
    }

    pub async fn add_progress_update(
        &self,
        project_id: &ProjectId,
        update: ProgressUpdate,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<ProgressOutcome>> {
        let committed = self
            .mutate("record physical progress", project_id, ctx, |project, now| {
                apply_progress_update(project, &update, &ctx.actor, &ctx.client, now)
            })
            .await?;
        Ok(self.advised(committed))
    }

    pub async fn add_financial_progress_update(
        &self,
        project_id: &ProjectId,
        update: FinancialUpdate,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<FinancialUpdateRecord>> {
        let committed = self
            .mutate("record financial progress", project_id, ctx, |project, now| {
                apply_financial_update(project, &update, &ctx.actor, &ctx.client, now)
            })
            .await?;
        Ok(self.advised(committed))
    }

    /// Apply a physical and/or financial update in one call. Either every
    /// supplied leg commits or none does.
    pub async fn add_combined_update(
        &self,
        project_id: &ProjectId,
        update: CombinedUpdate,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<CombinedOutcome>> {
        let committed = self
            .mutate("record combined progress", project_id, ctx, |project, now| {
                apply_combined_update(project, &update, &ctx.actor, &ctx.client, now)
            })
            .await?;
        Ok(self.advised(committed))
    }

    pub async fn set_editable_lock(
        &self,
        project_id: &ProjectId,
        is_editable: bool,
        reason: Option<String>,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<EditableStatusHistoryEntry>> {
        let committed = self
            .mutate("change editable lock", project_id, ctx, |project, now| {
                set_editable(project, is_editable, &ctx.actor, reason.clone(), now)
            })
            .await?;
        Ok(Self::plain(committed))
    }

    pub async fn set_progress_updates_enabled(
        &self,
        project_id: &ProjectId,
        enabled: bool,
        reason: Option<String>,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<()>> {
        self.set_ledger_enabled(project_id, LedgerKind::Physical, enabled, reason, ctx)
            .await
    }

    pub async fn set_financial_progress_updates_enabled(
        &self,
        project_id: &ProjectId,
        enabled: bool,
        reason: Option<String>,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<()>> {
        self.set_ledger_enabled(project_id, LedgerKind::Financial, enabled, reason, ctx)
            .await
    }

    async fn set_ledger_enabled(
        &self,
        project_id: &ProjectId,
        ledger: LedgerKind,
        enabled: bool,
        reason: Option<String>,
        ctx: &CallContext,
    ) -> EngineResult<Mutation<()>> {
        let committed = self
            .mutate("switch ledger", project_id, ctx, |project, now| {
                set_updates_enabled(project, ledger, enabled, &ctx.actor, now)
            })
            .await?;
        if let Some(reason) = reason.as_deref() {
            info!(project_id = %project_id, %ledger, enabled, reason, "ledger switch reason");
        }
        Ok(Self::plain(committed))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_project(&self, project_id: &ProjectId) -> EngineResult<Project> {
        self.coordinator
            .repository()
            .get(project_id)
            .await?
            .ok_or_else(|| EngineError::ProjectNotFound {
                project_id: project_id.0.clone(),
            })
    }

    pub async fn get_progress_history(
        &self,
        project_id: &ProjectId,
        request: PageRequest,
    ) -> EngineResult<Page<ProgressUpdateRecord>> {
        self.history(project_id, HistoryKind::Progress, request, |record| match record {
            HistoryRecord::Progress(r) => Some(r),
            _ => None,
        })
        .await
    }

    pub async fn get_financial_progress_history(
        &self,
        project_id: &ProjectId,
        request: PageRequest,
    ) -> EngineResult<Page<FinancialUpdateRecord>> {
        self.history(project_id, HistoryKind::Financial, request, |record| match record {
            HistoryRecord::Financial(r) => Some(r),
            _ => None,
        })
        .await
    }

    pub async fn get_status_history(
        &self,
        project_id: &ProjectId,
        request: PageRequest,
    ) -> EngineResult<Page<StatusHistoryEntry>> {
        self.history(project_id, HistoryKind::Status, request, |record| match record {
            HistoryRecord::Status(r) => Some(r),
            _ => None,
        })
        .await
    }

    pub async fn get_editable_history(
        &self,
        project_id: &ProjectId,
        request: PageRequest,
    ) -> EngineResult<Page<EditableStatusHistoryEntry>> {
        self.history(project_id, HistoryKind::Editable, request, |record| match record {
            HistoryRecord::Editable(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn history<R>(
        &self,
        project_id: &ProjectId,
        kind: HistoryKind,
        request: PageRequest,
        pick: fn(HistoryRecord) -> Option<R>,
    ) -> EngineResult<Page<R>> {
        let page = self
            .coordinator
            .repository()
            .history_page(project_id, kind, request)
            .await?;

        let mut records = Vec::with_capacity(page.records.len());
        for record in page.records {
            let record_kind = record.kind();
            let typed = pick(record).ok_or_else(|| {
                EngineError::Internal(format!(
                    "{} history of project {} returned a {} record",
                    kind.as_str(),
                    project_id,
                    record_kind.as_str()
                ))
            })?;
            records.push(typed);
        }
        Ok(Page {
            records,
            pagination: page.pagination,
        })
    }

    /// Derived summary of a project as seen by `viewer`, served from the cache
    /// when possible.
    pub async fn project_summary(
        &self,
        project_id: &ProjectId,
        viewer: Role,
    ) -> EngineResult<ProjectSummary> {
        if let Some(summary) = self.cache.get(project_id, viewer).await {
            return Ok(summary);
        }

        let generation = self.cache.generation(project_id).await;
        let project = self.get_project(project_id).await?;
        let summary = project_summary(&project, viewer);
        self.cache
            .put(project_id, viewer, summary.clone(), generation)
            .await;
        Ok(summary)
    }

    pub async fn list_projects(&self) -> EngineResult<Vec<ProjectId>> {
        Ok(self.coordinator.repository().list_ids().await?)
    }
}
