//! Progress ledgers.
//!
//! Each ledger is an append-only history of update records plus the project
//! fields recomputed from it. The functions here are pure: they validate every
//! rule before touching the project, so an `Err` leaves it unchanged.

pub mod advisory;
pub mod combined;
pub mod financial;
pub mod progress;

pub use advisory::{advisories_at, Advisory};
pub use combined::{apply_combined_update, CombinedOutcome, CombinedUpdate};
pub use financial::{
    apply_financial_update, validate_financial_update, FinancialUpdate,
    MAX_BILL_DECREASE_RATIO, MAX_BILL_INCREASE_RATIO,
};
pub use progress::{
    apply_progress_update, validate_progress_update, AutoCompletion, ProgressOutcome,
    ProgressUpdate, MAX_PROGRESS_DECREASE, MAX_PROGRESS_JUMP,
};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;

use crate::actor::{Actor, Role};
use crate::error::{EngineError, EngineResult, LedgerKind};
use crate::project::Project;

/// `round(bill / cost * 100)`, rounding half away from zero.
///
/// A project with no estimated cost has no financial progress.
pub fn financial_percentage(bill_amount: Decimal, estimated_cost: Decimal) -> Decimal {
    if estimated_cost.is_zero() {
        return Decimal::ZERO;
    }
    (bill_amount / estimated_cost * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Only JEs record progress, and only while the ledger is switched on.
pub(crate) fn require_ledger_access(
    project: &Project,
    actor: &Actor,
    ledger: LedgerKind,
) -> EngineResult<()> {
    if actor.role != Role::Je {
        return Err(EngineError::Unauthorized {
            role: actor.role,
            action: match ledger {
                LedgerKind::Physical => "record physical progress",
                LedgerKind::Financial => "record financial progress",
            },
        });
    }
    let enabled = match ledger {
        LedgerKind::Physical => project.progress_updates_enabled,
        LedgerKind::Financial => project.financial_progress_updates_enabled,
    };
    if !enabled {
        return Err(EngineError::UpdatesDisabled { ledger });
    }
    Ok(())
}

/// Switch a ledger on or off. MD/ADMIN/SUPERADMIN only.
pub fn set_updates_enabled(
    project: &mut Project,
    ledger: LedgerKind,
    enabled: bool,
    actor: &Actor,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if !actor.role.can_administer() {
        return Err(EngineError::Unauthorized {
            role: actor.role,
            action: "switch progress updates on or off",
        });
    }
    let (field, slot) = match ledger {
        LedgerKind::Physical => ("progressUpdatesEnabled", &mut project.progress_updates_enabled),
        LedgerKind::Financial => (
            "financialProgressUpdatesEnabled",
            &mut project.financial_progress_updates_enabled,
        ),
    };
    if *slot == enabled {
        return Err(EngineError::no_op(field, enabled));
    }
    *slot = enabled;
    project.updated_at = now;
    info!(
        project_id = %project.project_id,
        %ledger,
        enabled,
        by = %actor.user_id,
        "ledger switch changed"
    );
    Ok(())
}
