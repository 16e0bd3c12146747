//! Physical and financial updates submitted together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::financial::{apply_financial_update, FinancialUpdate};
use super::progress::{apply_progress_update, ProgressOutcome, ProgressUpdate};
use crate::actor::{Actor, ClientInfo};
use crate::error::{EngineError, EngineResult};
use crate::project::Project;
use crate::records::FinancialUpdateRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedUpdate {
    pub progress: Option<ProgressUpdate>,
    pub financial: Option<FinancialUpdate>,
}

/// Which legs were applied. A leg that was not supplied is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedOutcome {
    pub progress: Option<ProgressOutcome>,
    pub financial: Option<FinancialUpdateRecord>,
}

/// Apply whichever legs were supplied, all or nothing.
///
/// Legs run against a working copy; the project is only replaced once every
/// supplied leg has succeeded.
pub fn apply_combined_update(
    project: &mut Project,
    update: &CombinedUpdate,
    actor: &Actor,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> EngineResult<CombinedOutcome> {
    if update.progress.is_none() && update.financial.is_none() {
        return Err(EngineError::invalid(
            "update",
            "at least one of a physical or a financial update is required",
        ));
    }

    let mut working = project.clone();
    let progress = update
        .progress
        .as_ref()
        .map(|leg| apply_progress_update(&mut working, leg, actor, client, now))
        .transpose()?;
    let financial = update
        .financial
        .as_ref()
        .map(|leg| apply_financial_update(&mut working, leg, actor, client, now))
        .transpose()?;

    *project = working;
    Ok(CombinedOutcome {
        progress,
        financial,
    })
}
