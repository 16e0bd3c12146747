//! Role-gated status transitions.
//!
//! The allowed moves live in `TRANSITION_TABLE`, a plain lookup structure, so
//! the whole graph can be enumerated and checked exhaustively. `change_status`
//! is the only code that writes `Project::status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::editable::lock_for_resubmission;
use super::status::ProjectStatus;
use crate::actor::{Actor, ClientInfo, Role};
use crate::error::{EngineError, EngineResult};
use crate::project::Project;
use crate::records::{client_fields, new_record_id, StatusHistoryEntry};

/// One row of the transition table: `role` may move a project from any of
/// `from` to any of `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub role: Role,
    pub from: &'static [ProjectStatus],
    pub to: &'static [ProjectStatus],
}

const AWAITING_APPROVAL: &[ProjectStatus] = &[
    ProjectStatus::SubmittedForApproval,
    ProjectStatus::ResubmittedForApproval,
];

const REJECTED: &[ProjectStatus] = &[
    ProjectStatus::RejectedByAee,
    ProjectStatus::RejectedByCe,
    ProjectStatus::RejectedByMd,
];

pub const TRANSITION_TABLE: &[TransitionRule] = &[
    TransitionRule {
        role: Role::Je,
        from: REJECTED,
        to: &[ProjectStatus::ResubmittedForApproval],
    },
    TransitionRule {
        role: Role::Je,
        from: &[ProjectStatus::Ongoing],
        to: &[ProjectStatus::Completed],
    },
    TransitionRule {
        role: Role::Aee,
        from: AWAITING_APPROVAL,
        to: &[ProjectStatus::RejectedByAee, ProjectStatus::Ongoing],
    },
    TransitionRule {
        role: Role::Ce,
        from: AWAITING_APPROVAL,
        to: &[ProjectStatus::RejectedByCe, ProjectStatus::Ongoing],
    },
    TransitionRule {
        role: Role::Md,
        from: AWAITING_APPROVAL,
        to: &[ProjectStatus::RejectedByMd, ProjectStatus::Ongoing],
    },
];

/// Remark written on transitions fired by the engine itself.
pub const AUTO_COMPLETION_REMARK: &str = "auto-completion";

pub fn is_allowed(role: Role, from: ProjectStatus, to: ProjectStatus) -> bool {
    TRANSITION_TABLE
        .iter()
        .any(|rule| rule.role == role && rule.from.contains(&from) && rule.to.contains(&to))
}

/// Every status `role` may move a project to from `from`.
pub fn allowed_targets(role: Role, from: ProjectStatus) -> Vec<ProjectStatus> {
    let mut targets: Vec<ProjectStatus> = TRANSITION_TABLE
        .iter()
        .filter(|rule| rule.role == role && rule.from.contains(&from))
        .flat_map(|rule| rule.to.iter().copied())
        .collect();
    targets.dedup();
    targets
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub new_status: ProjectStatus,
    pub remarks: Option<String>,
    pub rejection_reason: Option<String>,
}

impl StatusChange {
    pub fn to(new_status: ProjectStatus) -> Self {
        Self {
            new_status,
            remarks: None,
            rejection_reason: None,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn with_rejection_reason(mut self, reason: impl Into<String>) -> Self {
        self.rejection_reason = Some(reason.into());
        self
    }
}

/// Check a change against the current state without touching the project.
pub fn validate_status_change(
    project: &Project,
    change: &StatusChange,
    actor: &Actor,
) -> EngineResult<()> {
    let current = project.status;
    if change.new_status == current {
        return Err(EngineError::no_op("status", current));
    }
    if !is_allowed(actor.role, current, change.new_status) {
        return Err(EngineError::InvalidTransition {
            role: actor.role,
            from: current,
            to: change.new_status,
        });
    }
    if change.new_status.is_rejected() && non_blank(&change.rejection_reason).is_none() {
        return Err(EngineError::RejectionReasonRequired {
            to: change.new_status,
        });
    }
    Ok(())
}

/// Move the project to a new status, appending one status history entry.
///
/// Resubmission also locks the project for editing and clears the previous
/// round's approval and rejection stamps.
pub fn change_status(
    project: &mut Project,
    change: &StatusChange,
    actor: &Actor,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> EngineResult<StatusHistoryEntry> {
    apply(project, change, actor, client, now, false)
}

/// Fire the automatic `Ongoing -> Completed` move on behalf of the actor whose
/// progress update reached 100%.
pub(crate) fn auto_complete(
    project: &mut Project,
    updater: &Actor,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> EngineResult<StatusHistoryEntry> {
    let change = StatusChange::to(ProjectStatus::Completed).with_remarks(AUTO_COMPLETION_REMARK);
    apply(project, &change, updater, client, now, true)
}

fn apply(
    project: &mut Project,
    change: &StatusChange,
    actor: &Actor,
    client: &ClientInfo,
    now: DateTime<Utc>,
    automatic: bool,
) -> EngineResult<StatusHistoryEntry> {
    validate_status_change(project, change, actor)?;

    let previous = project.status;
    let next = change.new_status;
    let rejection_reason = if next.is_rejected() {
        non_blank(&change.rejection_reason)
    } else {
        None
    };
    let (ip_address, user_agent) = client_fields(client);
    let entry = StatusHistoryEntry {
        id: new_record_id(),
        previous_status: previous,
        new_status: next,
        changed_by: actor.as_updated_by(),
        remarks: non_blank(&change.remarks),
        rejection_reason: rejection_reason.clone(),
        automatic,
        ip_address,
        user_agent,
        created_at: now,
    };

    project.status_history.push(entry.clone());
    project.status = next;
    project.updated_at = now;

    let workflow = &mut project.workflow;
    match next {
        ProjectStatus::Ongoing => {
            workflow.approved_at = Some(now);
            workflow.approved_by = Some(actor.as_updated_by());
        }
        ProjectStatus::RejectedByAee | ProjectStatus::RejectedByCe | ProjectStatus::RejectedByMd => {
            workflow.rejected_at = Some(now);
            workflow.rejected_by = Some(actor.as_updated_by());
            workflow.rejection_reason = rejection_reason;
        }
        ProjectStatus::ResubmittedForApproval => {
            workflow.approved_at = None;
            workflow.approved_by = None;
            workflow.rejected_at = None;
            workflow.rejected_by = None;
            workflow.rejection_reason = None;
            workflow.resubmitted_at = Some(now);
            lock_for_resubmission(project, actor, now);
        }
        ProjectStatus::Completed => {
            workflow.completed_at = Some(now);
        }
        ProjectStatus::SubmittedForApproval => {}
    }

    debug!(
        project_id = %project.project_id,
        from = %previous,
        to = %next,
        role = %actor.role,
        automatic,
        "status changed"
    );
    Ok(entry)
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
