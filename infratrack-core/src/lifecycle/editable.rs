//! The editable lock.
//!
//! Independent of approval status. Toggled by MD/ADMIN/SUPERADMIN, or by the
//! status machine when a project is resubmitted. Every toggle is recorded.

use chrono::{DateTime, Utc};

use super::transition::non_blank;
use crate::actor::Actor;
use crate::error::{EngineError, EngineResult};
use crate::project::Project;
use crate::records::{new_record_id, EditableStatusHistoryEntry};

pub const RESUBMISSION_LOCK_REASON: &str = "Locked automatically on resubmission for approval";

pub fn set_editable(
    project: &mut Project,
    is_editable: bool,
    actor: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> EngineResult<EditableStatusHistoryEntry> {
    if !actor.role.can_administer() {
        return Err(EngineError::Unauthorized {
            role: actor.role,
            action: "change the editable lock",
        });
    }
    if project.is_project_editable == is_editable {
        return Err(EngineError::no_op("isProjectEditable", is_editable));
    }
    Ok(toggle(project, is_editable, actor, non_blank(&reason), now, false))
}

/// Lock the project as part of a resubmission. Already-locked projects are
/// left alone and produce no entry.
pub(crate) fn lock_for_resubmission(
    project: &mut Project,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Option<EditableStatusHistoryEntry> {
    if !project.is_project_editable {
        return None;
    }
    Some(toggle(
        project,
        false,
        actor,
        Some(RESUBMISSION_LOCK_REASON.to_string()),
        now,
        true,
    ))
}

fn toggle(
    project: &mut Project,
    is_editable: bool,
    actor: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
    automatic: bool,
) -> EditableStatusHistoryEntry {
    let entry = EditableStatusHistoryEntry {
        id: new_record_id(),
        previous_status: project.is_project_editable,
        new_status: is_editable,
        changed_by: actor.as_updated_by(),
        reason,
        automatic,
        changed_at: now,
    };
    project.editable_status_history.push(entry.clone());
    project.is_project_editable = is_editable;
    project.updated_at = now;
    entry
}
