//! The project aggregate.
//!
//! `Project` is a plain data record. Its fields are only writable from inside
//! this crate, through the lifecycle and ledger operations, so every change to
//! progress, billing or status goes through the rules that also append the
//! matching history record.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Role, UpdatedBy};
use crate::error::{EngineError, EngineResult};
use crate::ledger::financial_percentage;
use crate::lifecycle::ProjectStatus;
use crate::records::{
    EditableStatusHistoryEntry, FinancialUpdateRecord, HistoryRecord, ProgressUpdateRecord,
    StatusHistoryEntry,
};

/// Human-assigned unique project reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Input for creating a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub project_id: ProjectId,
    pub project_name: String,
    pub estimated_cost: Decimal,
    #[serde(default = "enabled")]
    pub progress_updates_enabled: bool,
    #[serde(default = "enabled")]
    pub financial_progress_updates_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl NewProject {
    pub fn new(
        project_id: impl Into<ProjectId>,
        project_name: impl Into<String>,
        estimated_cost: Decimal,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            project_name: project_name.into(),
            estimated_cost,
            progress_updates_enabled: true,
            financial_progress_updates_enabled: true,
        }
    }
}

/// Approval workflow timestamps, cleared on resubmission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStamps {
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UpdatedBy>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UpdatedBy>,
    pub rejection_reason: Option<String>,
    pub resubmitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub(crate) project_id: ProjectId,
    pub(crate) project_name: String,
    pub(crate) estimated_cost: Decimal,

    pub(crate) progress_percentage: Decimal,
    pub(crate) progress_updates_enabled: bool,
    pub(crate) last_progress_update: Option<DateTime<Utc>>,

    pub(crate) financial_progress: Decimal,
    pub(crate) bill_submitted_amount: Decimal,
    pub(crate) financial_progress_updates_enabled: bool,
    pub(crate) last_financial_progress_update: Option<DateTime<Utc>>,

    pub(crate) status: ProjectStatus,
    pub(crate) is_project_editable: bool,
    #[serde(default)]
    pub(crate) workflow: WorkflowStamps,

    pub(crate) created_by: UpdatedBy,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    /// Monotonic commit counter, maintained by the storage layer.
    pub(crate) version: u64,

    #[serde(default)]
    pub(crate) progress_updates: Vec<ProgressUpdateRecord>,
    #[serde(default)]
    pub(crate) financial_progress_updates: Vec<FinancialUpdateRecord>,
    #[serde(default)]
    pub(crate) status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub(crate) editable_status_history: Vec<EditableStatusHistoryEntry>,
}

impl Project {
    /// Create a project in its initial state. Only a JE may create projects.
    pub fn create(new: NewProject, actor: &Actor, now: DateTime<Utc>) -> EngineResult<Self> {
        if actor.role != Role::Je {
            return Err(EngineError::Unauthorized {
                role: actor.role,
                action: "create projects",
            });
        }
        if new.project_id.0.trim().is_empty() {
            return Err(EngineError::invalid("projectId", "must not be blank"));
        }
        if new.project_name.trim().is_empty() {
            return Err(EngineError::invalid("projectName", "must not be blank"));
        }
        if new.estimated_cost < Decimal::ZERO {
            return Err(EngineError::invalid(
                "estimatedCost",
                format!("must not be negative (got {})", new.estimated_cost),
            ));
        }

        Ok(Self {
            project_id: ProjectId(new.project_id.0.trim().to_string()),
            project_name: new.project_name.trim().to_string(),
            estimated_cost: new.estimated_cost,
            progress_percentage: Decimal::ZERO,
            progress_updates_enabled: new.progress_updates_enabled,
            last_progress_update: None,
            financial_progress: Decimal::ZERO,
            bill_submitted_amount: Decimal::ZERO,
            financial_progress_updates_enabled: new.financial_progress_updates_enabled,
            last_financial_progress_update: None,
            status: ProjectStatus::SubmittedForApproval,
            is_project_editable: false,
            workflow: WorkflowStamps::default(),
            created_by: actor.as_updated_by(),
            created_at: now,
            updated_at: now,
            version: 1,
            progress_updates: Vec::new(),
            financial_progress_updates: Vec::new(),
            status_history: Vec::new(),
            editable_status_history: Vec::new(),
        })
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn estimated_cost(&self) -> Decimal {
        self.estimated_cost
    }

    pub fn progress_percentage(&self) -> Decimal {
        self.progress_percentage
    }

    pub fn progress_updates_enabled(&self) -> bool {
        self.progress_updates_enabled
    }

    pub fn last_progress_update(&self) -> Option<DateTime<Utc>> {
        self.last_progress_update
    }

    pub fn financial_progress(&self) -> Decimal {
        self.financial_progress
    }

    pub fn bill_submitted_amount(&self) -> Decimal {
        self.bill_submitted_amount
    }

    pub fn financial_progress_updates_enabled(&self) -> bool {
        self.financial_progress_updates_enabled
    }

    pub fn last_financial_progress_update(&self) -> Option<DateTime<Utc>> {
        self.last_financial_progress_update
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn is_project_editable(&self) -> bool {
        self.is_project_editable
    }

    pub fn workflow(&self) -> &WorkflowStamps {
        &self.workflow
    }

    pub fn created_by(&self) -> &UpdatedBy {
        &self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn progress_updates(&self) -> &[ProgressUpdateRecord] {
        &self.progress_updates
    }

    pub fn financial_progress_updates(&self) -> &[FinancialUpdateRecord] {
        &self.financial_progress_updates
    }

    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }

    pub fn editable_status_history(&self) -> &[EditableStatusHistoryEntry] {
        &self.editable_status_history
    }

    /// Record the version assigned by a successful commit.
    pub fn mark_committed(&mut self, version: u64) {
        self.version = version;
    }

    pub fn history_lengths(&self) -> HistoryLengths {
        HistoryLengths {
            progress: self.progress_updates.len(),
            financial: self.financial_progress_updates.len(),
            status: self.status_history.len(),
            editable: self.editable_status_history.len(),
        }
    }

    /// Records appended since `earlier` was taken, in append order per history.
    ///
    /// Fails if any history is shorter than it was, which would mean a record
    /// was removed.
    pub fn records_since(&self, earlier: HistoryLengths) -> EngineResult<Vec<HistoryRecord>> {
        let now = self.history_lengths();
        if !now.covers(&earlier) {
            return Err(EngineError::Internal(format!(
                "history of project {} shrank from {:?} to {:?}",
                self.project_id, earlier, now
            )));
        }

        let mut appended = Vec::new();
        appended.extend(
            self.progress_updates[earlier.progress..]
                .iter()
                .cloned()
                .map(HistoryRecord::Progress),
        );
        appended.extend(
            self.financial_progress_updates[earlier.financial..]
                .iter()
                .cloned()
                .map(HistoryRecord::Financial),
        );
        appended.extend(
            self.status_history[earlier.status..]
                .iter()
                .cloned()
                .map(HistoryRecord::Status),
        );
        appended.extend(
            self.editable_status_history[earlier.editable..]
                .iter()
                .cloned()
                .map(HistoryRecord::Editable),
        );
        // Ledger appends come before any auto-transition they triggered.
        appended.sort_by_key(HistoryRecord::recorded_at);
        Ok(appended)
    }

    /// Check the derived-field invariants. Used after loading from storage.
    pub fn check_invariants(&self) -> EngineResult<()> {
        let expected = financial_percentage(self.bill_submitted_amount, self.estimated_cost);
        if self.financial_progress != expected {
            return Err(EngineError::Internal(format!(
                "project {}: financial progress {} does not match bill {} / cost {}",
                self.project_id,
                self.financial_progress,
                self.bill_submitted_amount,
                self.estimated_cost
            )));
        }
        if self.bill_submitted_amount > self.estimated_cost {
            return Err(EngineError::Internal(format!(
                "project {}: bill {} exceeds estimated cost {}",
                self.project_id, self.bill_submitted_amount, self.estimated_cost
            )));
        }
        if self.progress_percentage < Decimal::ZERO
            || self.progress_percentage > Decimal::ONE_HUNDRED
        {
            return Err(EngineError::Internal(format!(
                "project {}: progress {} out of range",
                self.project_id, self.progress_percentage
            )));
        }
        Ok(())
    }
}

/// Lengths of the four histories at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryLengths {
    pub progress: usize,
    pub financial: usize,
    pub status: usize,
    pub editable: usize,
}

impl HistoryLengths {
    /// True if every history is at least as long as in `earlier`.
    pub fn covers(&self, earlier: &HistoryLengths) -> bool {
        self.progress >= earlier.progress
            && self.financial >= earlier.financial
            && self.status >= earlier.status
            && self.editable >= earlier.editable
    }

    pub fn total(&self) -> usize {
        self.progress + self.financial + self.status + self.editable
    }
}
