//! Read-side values derived from a project.
//!
//! Pure functions over the persisted fields, computed at the boundary so the
//! aggregate itself stays a plain record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::actor::Role;
use crate::lifecycle::{allowed_targets, ProjectStatus};
use crate::project::Project;

/// Estimated cost not yet billed.
pub fn remaining_budget(project: &Project) -> Decimal {
    project.estimated_cost() - project.bill_submitted_amount()
}

/// Physical minus financial progress, in percentage points. Positive means
/// work is ahead of billing.
pub fn progress_gap(project: &Project) -> Decimal {
    project.progress_percentage() - project.financial_progress()
}

pub fn is_physically_complete(project: &Project) -> bool {
    project.progress_percentage() == Decimal::ONE_HUNDRED
}

pub fn is_fully_billed(project: &Project) -> bool {
    project.financial_progress() == Decimal::ONE_HUNDRED
}

/// Most recent update to either ledger.
pub fn last_activity(project: &Project) -> Option<DateTime<Utc>> {
    match (
        project.last_progress_update(),
        project.last_financial_progress_update(),
    ) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub project_id: String,
    pub project_name: String,
    pub status: ProjectStatus,
    pub is_project_editable: bool,
    pub estimated_cost: Decimal,
    pub bill_submitted_amount: Decimal,
    pub remaining_budget: Decimal,
    pub progress_percentage: Decimal,
    pub financial_progress: Decimal,
    pub progress_gap: Decimal,
    pub progress_update_count: usize,
    pub financial_update_count: usize,
    pub status_change_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    /// Statuses the viewing role could move the project to right now.
    pub available_transitions: Vec<ProjectStatus>,
    pub version: u64,
}

pub fn project_summary(project: &Project, viewer: Role) -> ProjectSummary {
    ProjectSummary {
        project_id: project.project_id().to_string(),
        project_name: project.project_name().to_string(),
        status: project.status(),
        is_project_editable: project.is_project_editable(),
        estimated_cost: project.estimated_cost(),
        bill_submitted_amount: project.bill_submitted_amount(),
        remaining_budget: remaining_budget(project),
        progress_percentage: project.progress_percentage(),
        financial_progress: project.financial_progress(),
        progress_gap: progress_gap(project),
        progress_update_count: project.progress_updates().len(),
        financial_update_count: project.financial_progress_updates().len(),
        status_change_count: project.status_history().len(),
        last_activity: last_activity(project),
        available_transitions: allowed_targets(viewer, project.status()),
        version: project.version(),
    }
}
