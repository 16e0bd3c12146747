//! Physical progress ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::require_ledger_access;
use crate::actor::{Actor, ClientInfo};
use crate::document::SupportingDocument;
use crate::error::{EngineError, EngineResult, LedgerKind};
use crate::lifecycle::transition::{auto_complete, non_blank};
use crate::lifecycle::ProjectStatus;
use crate::project::Project;
use crate::records::{client_fields, new_record_id, ProgressUpdateRecord, StatusHistoryEntry};

/// Largest allowed decrease in one update, in percentage points.
pub const MAX_PROGRESS_DECREASE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Largest allowed increase in one update, in percentage points.
pub const MAX_PROGRESS_JUMP: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

const MAX_PROGRESS_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub new_progress: Decimal,
    pub remarks: Option<String>,
    #[serde(default)]
    pub supporting_documents: Vec<SupportingDocument>,
}

impl ProgressUpdate {
    pub fn to(new_progress: Decimal) -> Self {
        Self {
            new_progress,
            remarks: None,
            supporting_documents: Vec::new(),
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn with_document(mut self, document: SupportingDocument) -> Self {
        self.supporting_documents.push(document);
        self
    }
}

/// What happened to the automatic completion triggered by reaching 100%.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AutoCompletion {
    Completed { entry: StatusHistoryEntry },
    /// The transition was refused; the progress update still stands.
    Failed { code: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOutcome {
    pub record: ProgressUpdateRecord,
    pub auto_completion: Option<AutoCompletion>,
}

pub fn validate_progress_update(
    project: &Project,
    update: &ProgressUpdate,
    actor: &Actor,
) -> EngineResult<()> {
    require_ledger_access(project, actor, LedgerKind::Physical)?;

    let new = update.new_progress;
    if new < Decimal::ZERO || new > Decimal::ONE_HUNDRED {
        return Err(EngineError::invalid(
            "newProgress",
            format!("must be between 0 and 100 (got {})", new),
        ));
    }
    if new.normalize().scale() > MAX_PROGRESS_SCALE {
        return Err(EngineError::invalid(
            "newProgress",
            format!("at most two decimal places are allowed (got {})", new),
        ));
    }

    let current = project.progress_percentage;
    if current - new > MAX_PROGRESS_DECREASE {
        return Err(EngineError::BackwardNotAllowed {
            ledger: LedgerKind::Physical,
            current,
            attempted: new,
            limit: MAX_PROGRESS_DECREASE,
        });
    }
    if new - current > MAX_PROGRESS_JUMP {
        return Err(EngineError::UnrealisticJump {
            ledger: LedgerKind::Physical,
            current,
            attempted: new,
            limit: MAX_PROGRESS_JUMP,
        });
    }
    if new == Decimal::ONE_HUNDRED && update.supporting_documents.is_empty() {
        return Err(EngineError::CompletionRequiresDocuments {
            ledger: LedgerKind::Physical,
        });
    }
    Ok(())
}

/// Validate and append a physical progress update.
///
/// Reaching 100% while the project is `Ongoing` also moves it to `Completed`.
/// That follow-on transition is soft: if it is refused the failure is logged
/// and reported in the outcome, and the progress update is kept.
pub fn apply_progress_update(
    project: &mut Project,
    update: &ProgressUpdate,
    actor: &Actor,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> EngineResult<ProgressOutcome> {
    validate_progress_update(project, update, actor)?;

    let previous = project.progress_percentage;
    let new = update.new_progress.normalize();
    let (ip_address, user_agent) = client_fields(client);
    let record = ProgressUpdateRecord {
        id: new_record_id(),
        previous_progress: previous,
        new_progress: new,
        progress_difference: new - previous,
        remarks: non_blank(&update.remarks),
        supporting_documents: update.supporting_documents.clone(),
        updated_by: actor.as_updated_by(),
        ip_address,
        user_agent,
        created_at: now,
    };

    project.progress_updates.push(record.clone());
    project.progress_percentage = new;
    project.last_progress_update = Some(now);
    project.updated_at = now;

    info!(
        project_id = %project.project_id,
        previous = %previous,
        new = %new,
        by = %actor.user_id,
        "physical progress recorded"
    );

    let auto_completion =
        if new == Decimal::ONE_HUNDRED && project.status == ProjectStatus::Ongoing {
            Some(match auto_complete(project, actor, client, now) {
                Ok(entry) => {
                    info!(project_id = %project.project_id, "project auto-completed");
                    AutoCompletion::Completed { entry }
                }
                Err(e) => {
                    warn!(
                        project_id = %project.project_id,
                        error = %e,
                        "auto-completion failed; keeping progress update"
                    );
                    AutoCompletion::Failed {
                        code: e.code(),
                        message: e.to_string(),
                    }
                }
            })
        } else {
            None
        };

    Ok(ProgressOutcome {
        record,
        auto_completion,
    })
}
