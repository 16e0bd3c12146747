use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use infratrack_core::{
    Actor, AutoCompletion, ClientInfo, CombinedUpdate, FileType, FinancialUpdate, HistoryKind,
    HistoryRecord, NewProject, Page, PageRequest, ProgressUpdate, Project, ProjectId,
    ProjectStatus, Role, StatusChange, SupportingDocument,
};
use infratrack_server::{
    CallContext, EngineSettings, InMemoryRepository, NoSummaryCache, ProjectCommit,
    ProjectEngine, ProjectRepository, RepositoryError, TtlSummaryCache,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn ctx(role: Role) -> CallContext {
    let user = format!("{}-1", role.as_str().to_lowercase());
    CallContext::new(Actor::new(user, "Officer", role))
        .with_client(ClientInfo::new("10.0.0.7", "field-app/2.3"))
}

fn je() -> CallContext {
    ctx(Role::Je)
}

fn document(name: &str) -> SupportingDocument {
    SupportingDocument {
        file_name: format!("{}.pdf", name),
        original_name: format!("{}.pdf", name),
        download_url: format!("https://files.example/{}.pdf", name),
        storage_path: format!("projects/{}.pdf", name),
        file_size: 4096,
        mime_type: "application/pdf".into(),
        file_type: FileType::Document,
        uploaded_at: Utc::now(),
    }
}

async fn engine_with(cost: Decimal) -> (ProjectEngine, ProjectId) {
    let engine = ProjectEngine::in_memory(EngineSettings::default());
    let project = engine
        .create_project(NewProject::new("PRJ-100", "Ward 12 storm drain", cost), &je())
        .await
        .unwrap();
    (engine, project.project_id().clone())
}

async fn approve(engine: &ProjectEngine, id: &ProjectId) {
    engine
        .change_status(id, StatusChange::to(ProjectStatus::Ongoing), &ctx(Role::Aee))
        .await
        .unwrap();
}

#[tokio::test]
async fn scenario_a_financial_backward_limit() {
    let (engine, id) = engine_with(dec!(100000)).await;

    let first = engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(60000)), &je())
        .await
        .unwrap();
    assert_eq!(first.project.financial_progress(), dec!(60));

    let second = engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(58000)), &je())
        .await
        .unwrap();
    assert_eq!(second.project.bill_submitted_amount(), dec!(58000));
    assert_eq!(second.result.amount_difference, dec!(-2000));

    let err = engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(40000)), &je())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKWARD_NOT_ALLOWED");

    let stored = engine.get_project(&id).await.unwrap();
    assert_eq!(stored.bill_submitted_amount(), dec!(58000));
    assert_eq!(stored.financial_progress_updates().len(), 2);
}

#[tokio::test]
async fn scenario_b_role_outside_transition_table() {
    let (engine, id) = engine_with(dec!(100000)).await;

    let err = engine
        .change_status(&id, StatusChange::to(ProjectStatus::Completed), &ctx(Role::Aee))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    let stored = engine.get_project(&id).await.unwrap();
    assert_eq!(stored.status(), ProjectStatus::SubmittedForApproval);
    assert!(stored.status_history().is_empty());
    assert_eq!(stored.version(), 1);
}

#[tokio::test]
async fn scenario_c_rejection_needs_a_reason() {
    let (engine, id) = engine_with(dec!(100000)).await;
    let ce = ctx(Role::Ce);

    let err = engine
        .change_status(
            &id,
            StatusChange::to(ProjectStatus::RejectedByCe).with_rejection_reason("  "),
            &ce,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REJECTION_REASON_REQUIRED");

    let rejected = engine
        .change_status(
            &id,
            StatusChange::to(ProjectStatus::RejectedByCe)
                .with_rejection_reason("Estimate lacks soil survey"),
            &ce,
        )
        .await
        .unwrap();
    assert_eq!(rejected.project.status(), ProjectStatus::RejectedByCe);
    assert_eq!(rejected.project.progress_percentage(), Decimal::ZERO);
    assert_eq!(
        rejected.project.workflow().rejection_reason.as_deref(),
        Some("Estimate lacks soil survey")
    );
    assert_eq!(rejected.result.ip_address.as_deref(), Some("10.0.0.7"));

    let history = engine
        .get_status_history(&id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(history.pagination.total_records, 1);
    assert_eq!(history.records[0].previous_status, ProjectStatus::SubmittedForApproval);
}

#[tokio::test]
async fn scenario_d_completion_by_progress() {
    let (engine, id) = engine_with(dec!(100000)).await;
    approve(&engine, &id).await;
    for step in [dec!(50), dec!(70)] {
        engine
            .add_progress_update(&id, ProgressUpdate::to(step), &je())
            .await
            .unwrap();
    }

    let done = engine
        .add_progress_update(
            &id,
            ProgressUpdate::to(dec!(100)).with_document(document("completion")),
            &je(),
        )
        .await
        .unwrap();

    assert_eq!(done.project.status(), ProjectStatus::Completed);
    assert_eq!(done.project.progress_updates().len(), 3);
    assert!(done.project.workflow().completed_at.is_some());
    match &done.result.auto_completion {
        Some(AutoCompletion::Completed { entry }) => {
            assert!(entry.automatic);
            assert_eq!(entry.previous_status, ProjectStatus::Ongoing);
        }
        other => panic!("expected automatic completion, got {:?}", other),
    }

    let stored = engine.get_project(&id).await.unwrap();
    let last = stored.status_history().last().unwrap();
    assert_eq!(last.new_status, ProjectStatus::Completed);
    assert_eq!(last.remarks.as_deref(), Some("auto-completion"));
}

#[tokio::test]
async fn resubmission_locks_the_project() {
    let (engine, id) = engine_with(dec!(50000)).await;
    engine
        .set_editable_lock(&id, true, Some("revise scope".into()), &ctx(Role::Md))
        .await
        .unwrap();
    engine
        .change_status(
            &id,
            StatusChange::to(ProjectStatus::RejectedByMd).with_rejection_reason("scope unclear"),
            &ctx(Role::Md),
        )
        .await
        .unwrap();

    let resubmitted = engine
        .change_status(&id, StatusChange::to(ProjectStatus::ResubmittedForApproval), &je())
        .await
        .unwrap();
    let project = &resubmitted.project;
    assert!(!project.is_project_editable());
    assert!(project.workflow().rejection_reason.is_none());
    assert!(project.workflow().resubmitted_at.is_some());

    let editable = engine
        .get_editable_history(&id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(editable.pagination.total_records, 2);
    assert!(editable.records[0].automatic);
    assert!(!editable.records[0].new_status);
}

#[tokio::test]
async fn combined_update_is_all_or_nothing() {
    let (engine, id) = engine_with(dec!(100000)).await;

    let update = CombinedUpdate {
        progress: Some(ProgressUpdate::to(dec!(30))),
        financial: Some(FinancialUpdate::to(dec!(200000))),
    };
    let err = engine.add_combined_update(&id, update, &je()).await.unwrap_err();
    assert_eq!(err.code(), "EXCEEDS_ESTIMATED_COST");

    let stored = engine.get_project(&id).await.unwrap();
    assert_eq!(stored.progress_percentage(), Decimal::ZERO);
    assert!(stored.progress_updates().is_empty());
    assert_eq!(stored.version(), 1);

    let update = CombinedUpdate {
        progress: Some(ProgressUpdate::to(dec!(30))),
        financial: Some(FinancialUpdate::to(dec!(25000))),
    };
    let applied = engine.add_combined_update(&id, update, &je()).await.unwrap();
    assert!(applied.result.progress.is_some());
    assert!(applied.result.financial.is_some());
    assert_eq!(applied.project.progress_percentage(), dec!(30));
    assert_eq!(applied.project.financial_progress(), dec!(25));
    assert_eq!(applied.project.version(), 2);
}

#[tokio::test]
async fn history_pages_are_most_recent_first() {
    let (engine, id) = engine_with(dec!(100000)).await;
    for step in 1..=7 {
        engine
            .add_progress_update(&id, ProgressUpdate::to(Decimal::from(step * 5)), &je())
            .await
            .unwrap();
    }

    let first = engine
        .get_progress_history(&id, PageRequest::new(1, 3))
        .await
        .unwrap();
    assert_eq!(first.pagination.total_records, 7);
    assert_eq!(first.pagination.total_pages, 3);
    assert!(first.pagination.has_next_page);
    assert!(!first.pagination.has_prev_page);
    let values: Vec<Decimal> = first.records.iter().map(|r| r.new_progress).collect();
    assert_eq!(values, vec![dec!(35), dec!(30), dec!(25)]);

    let last = engine
        .get_progress_history(&id, PageRequest::new(3, 3))
        .await
        .unwrap();
    assert_eq!(last.records.len(), 1);
    assert_eq!(last.records[0].new_progress, dec!(5));
    assert!(!last.pagination.has_next_page);
}

#[tokio::test]
async fn history_request_from_json_is_clamped() {
    let (engine, id) = engine_with(dec!(100000)).await;
    engine
        .add_progress_update(&id, ProgressUpdate::to(dec!(5)), &je())
        .await
        .unwrap();

    let request: PageRequest = serde_json::from_str(r#"{"page":0,"pageSize":0}"#).unwrap();
    let page = engine.get_progress_history(&id, request).await.unwrap();
    assert_eq!(page.pagination.current_page, 1);
    assert_eq!(page.pagination.page_size, 1);
    assert_eq!(page.records.len(), 1);

    let statuses = engine.get_status_history(&id, request).await.unwrap();
    assert_eq!(statuses.pagination.total_pages, 0);
}

#[tokio::test]
async fn negative_bill_is_outside_estimated_cost() {
    let (engine, id) = engine_with(dec!(100000)).await;
    let err = engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(-1)), &je())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXCEEDS_ESTIMATED_COST");
    assert_eq!(engine.get_project(&id).await.unwrap().version(), 1);
}

#[tokio::test]
async fn retried_call_with_same_key_is_not_applied_twice() {
    let (engine, id) = engine_with(dec!(100000)).await;
    let call = je().with_operation_key("upload-7f3a");

    engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(10000)), &call)
        .await
        .unwrap();
    let err = engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(10000)), &call)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_OPERATION");

    let stored = engine.get_project(&id).await.unwrap();
    assert_eq!(stored.financial_progress_updates().len(), 1);
}

#[tokio::test]
async fn concurrent_updates_on_one_project_serialize() {
    let (engine, id) = engine_with(dec!(100000)).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for n in 1..=10 {
        let engine = engine.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            let update = FinancialUpdate::to(Decimal::from(n * 1000));
            engine.add_financial_progress_update(&id, update, &je()).await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }

    let stored = engine.get_project(&id).await.unwrap();
    assert_eq!(stored.financial_progress_updates().len(), accepted);
    assert_eq!(stored.version(), 1 + accepted as u64);
    // Every record starts where the previous one ended.
    let records = stored.financial_progress_updates();
    for pair in records.windows(2) {
        assert_eq!(pair[1].previous_bill_amount, pair[0].new_bill_amount);
    }
    assert_eq!(
        stored.bill_submitted_amount(),
        records.last().map(|r| r.new_bill_amount).unwrap_or_default()
    );
}

#[tokio::test]
async fn different_projects_progress_independently() {
    let engine = Arc::new(ProjectEngine::in_memory(EngineSettings::default()));
    let mut ids = Vec::new();
    for n in 0..5 {
        let project = engine
            .create_project(
                NewProject::new(format!("PRJ-{}", n), "Street lighting", dec!(1000)),
                &je(),
            )
            .await
            .unwrap();
        ids.push(project.project_id().clone());
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for step in [dec!(20), dec!(40), dec!(60)] {
                engine
                    .add_progress_update(&id, ProgressUpdate::to(step), &je())
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in &ids {
        let project = engine.get_project(id).await.unwrap();
        assert_eq!(project.progress_percentage(), dec!(60));
        assert_eq!(project.version(), 4);
    }
    assert_eq!(engine.list_projects().await.unwrap().len(), 5);
}

/// Repository whose loads take longer than the engine is willing to wait.
struct SlowRepository {
    inner: InMemoryRepository,
    load_delay: Duration,
}

#[async_trait]
impl ProjectRepository for SlowRepository {
    async fn get(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        tokio::time::sleep(self.load_delay).await;
        self.inner.get(id).await
    }

    async fn insert(&self, project: &Project) -> Result<(), RepositoryError> {
        self.inner.insert(project).await
    }

    async fn commit(&self, commit: ProjectCommit) -> Result<u64, RepositoryError> {
        self.inner.commit(commit).await
    }

    async fn is_operation_applied(
        &self,
        id: &ProjectId,
        key: &str,
    ) -> Result<bool, RepositoryError> {
        self.inner.is_operation_applied(id, key).await
    }

    async fn history_page(
        &self,
        id: &ProjectId,
        kind: HistoryKind,
        request: PageRequest,
    ) -> Result<Page<HistoryRecord>, RepositoryError> {
        self.inner.history_page(id, kind, request).await
    }

    async fn list_ids(&self) -> Result<Vec<ProjectId>, RepositoryError> {
        self.inner.list_ids().await
    }
}

#[tokio::test]
async fn slow_storage_times_out_without_writing() {
    let repository = Arc::new(SlowRepository {
        inner: InMemoryRepository::new(),
        load_delay: Duration::from_millis(300),
    });
    let settings = EngineSettings {
        transaction_timeout: Duration::from_millis(50),
        ..EngineSettings::default()
    };
    let engine = ProjectEngine::new(repository.clone(), Arc::new(NoSummaryCache), settings);
    let project = engine
        .create_project(NewProject::new("PRJ-9", "Pump house", dec!(1000)), &je())
        .await
        .unwrap();
    let id = project.project_id().clone();

    let err = engine
        .add_progress_update(&id, ProgressUpdate::to(dec!(10)), &je())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TRANSACTION_TIMEOUT");
    assert!(err.is_retryable());

    let stored = repository.inner.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.version(), 1);
    assert!(stored.progress_updates().is_empty());
}

#[tokio::test]
async fn summary_reflects_commits_and_viewer_role() {
    let repository = Arc::new(InMemoryRepository::new());
    let cache = Arc::new(TtlSummaryCache::new(Duration::from_secs(600)));
    let engine = ProjectEngine::new(repository, cache.clone(), EngineSettings::default());
    let id = engine
        .create_project(NewProject::new("PRJ-5", "Health centre annexe", dec!(200000)), &je())
        .await
        .unwrap()
        .project_id()
        .clone();

    let for_md = engine.project_summary(&id, Role::Md).await.unwrap();
    assert_eq!(
        for_md.available_transitions,
        vec![ProjectStatus::RejectedByMd, ProjectStatus::Ongoing]
    );
    let for_je = engine.project_summary(&id, Role::Je).await.unwrap();
    assert!(for_je.available_transitions.is_empty());
    assert_eq!(cache.len().await, 2);

    engine
        .add_financial_progress_update(&id, FinancialUpdate::to(dec!(50000)), &je())
        .await
        .unwrap();
    assert!(cache.is_empty().await);

    let after = engine.project_summary(&id, Role::Md).await.unwrap();
    assert_eq!(after.financial_progress, dec!(25));
    assert_eq!(after.remaining_budget, dec!(150000));
    assert_eq!(after.financial_update_count, 1);
}

#[tokio::test]
async fn sqlite_engine_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("infratrack.db");

    let id = {
        let engine = ProjectEngine::open(&path, EngineSettings::default()).unwrap();
        let id = engine
            .create_project(NewProject::new("PRJ-77", "Bus shelter row", dec!(40000)), &je())
            .await
            .unwrap()
            .project_id()
            .clone();
        approve(&engine, &id).await;
        engine
            .add_combined_update(
                &id,
                CombinedUpdate {
                    progress: Some(ProgressUpdate::to(dec!(45.5))),
                    financial: Some(FinancialUpdate::to(dec!(12000))),
                },
                &je(),
            )
            .await
            .unwrap();
        id
    };

    let engine = ProjectEngine::open(&path, EngineSettings::default()).unwrap();
    let project = engine.get_project(&id).await.unwrap();
    assert_eq!(project.status(), ProjectStatus::Ongoing);
    assert_eq!(project.progress_percentage(), dec!(45.5));
    assert_eq!(project.financial_progress(), dec!(30));
    assert_eq!(project.version(), 3);

    let statuses = engine
        .get_status_history(&id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(statuses.records.len(), 1);
    let bills = engine
        .get_financial_progress_history(&id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(bills.records[0].new_bill_amount, dec!(12000));
}
