//! Financial (billing) progress ledger.
//!
//! The bill amount is the recorded quantity; `financial_progress` is always
//! recomputed from it and never written directly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{financial_percentage, require_ledger_access};
use crate::actor::{Actor, ClientInfo};
use crate::document::SupportingDocument;
use crate::error::{EngineError, EngineResult, LedgerKind};
use crate::lifecycle::transition::non_blank;
use crate::project::Project;
use crate::records::{client_fields, new_record_id, BillDetails, FinancialUpdateRecord};

/// Largest allowed decrease in one update, as a fraction of the estimated cost.
pub const MAX_BILL_DECREASE_RATIO: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Largest allowed increase in one update, as a fraction of the estimated cost.
pub const MAX_BILL_INCREASE_RATIO: Decimal = Decimal::from_parts(50, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialUpdate {
    pub new_bill_amount: Decimal,
    pub remarks: Option<String>,
    #[serde(default)]
    pub bill_details: BillDetails,
    #[serde(default)]
    pub supporting_documents: Vec<SupportingDocument>,
}

impl FinancialUpdate {
    pub fn to(new_bill_amount: Decimal) -> Self {
        Self {
            new_bill_amount,
            remarks: None,
            bill_details: BillDetails::default(),
            supporting_documents: Vec::new(),
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn with_bill_number(mut self, bill_number: impl Into<String>) -> Self {
        self.bill_details.bill_number = Some(bill_number.into());
        self
    }

    pub fn with_document(mut self, document: SupportingDocument) -> Self {
        self.supporting_documents.push(document);
        self
    }
}

pub fn validate_financial_update(
    project: &Project,
    update: &FinancialUpdate,
    actor: &Actor,
) -> EngineResult<()> {
    require_ledger_access(project, actor, LedgerKind::Financial)?;

    let new = update.new_bill_amount;
    let cost = project.estimated_cost;
    if new < Decimal::ZERO || new > cost {
        return Err(EngineError::ExceedsEstimatedCost {
            attempted: new,
            estimated_cost: cost,
        });
    }

    let current = project.bill_submitted_amount;
    let max_decrease = cost * MAX_BILL_DECREASE_RATIO;
    if current - new > max_decrease {
        return Err(EngineError::BackwardNotAllowed {
            ledger: LedgerKind::Financial,
            current,
            attempted: new,
            limit: max_decrease,
        });
    }

    // The opening bill may cover any share of the cost.
    let max_increase = cost * MAX_BILL_INCREASE_RATIO;
    if !project.financial_progress_updates.is_empty() && new - current > max_increase {
        return Err(EngineError::UnrealisticJump {
            ledger: LedgerKind::Financial,
            current,
            attempted: new,
            limit: max_increase,
        });
    }

    if financial_percentage(new, cost) == Decimal::ONE_HUNDRED {
        if update.supporting_documents.is_empty() {
            return Err(EngineError::CompletionRequiresDocuments {
                ledger: LedgerKind::Financial,
            });
        }
        if !update.bill_details.has_bill_number() {
            return Err(EngineError::FinalBillDetailsRequired);
        }
    }
    Ok(())
}

/// Validate and append a billing update, recomputing financial progress.
pub fn apply_financial_update(
    project: &mut Project,
    update: &FinancialUpdate,
    actor: &Actor,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> EngineResult<FinancialUpdateRecord> {
    validate_financial_update(project, update, actor)?;

    let previous_amount = project.bill_submitted_amount;
    let new_amount = update.new_bill_amount;
    let previous_progress = project.financial_progress;
    let new_progress = financial_percentage(new_amount, project.estimated_cost);
    let (ip_address, user_agent) = client_fields(client);

    let mut bill_details = update.bill_details.clone();
    bill_details.bill_number = non_blank(&bill_details.bill_number);
    bill_details.bill_description = non_blank(&bill_details.bill_description);

    let record = FinancialUpdateRecord {
        id: new_record_id(),
        previous_progress,
        new_progress,
        progress_difference: new_progress - previous_progress,
        previous_bill_amount: previous_amount,
        new_bill_amount: new_amount,
        amount_difference: new_amount - previous_amount,
        bill_details,
        remarks: non_blank(&update.remarks),
        supporting_documents: update.supporting_documents.clone(),
        updated_by: actor.as_updated_by(),
        ip_address,
        user_agent,
        created_at: now,
    };

    project.financial_progress_updates.push(record.clone());
    project.bill_submitted_amount = new_amount;
    project.financial_progress = new_progress;
    project.last_financial_progress_update = Some(now);
    project.updated_at = now;

    info!(
        project_id = %project.project_id,
        previous_amount = %previous_amount,
        new_amount = %new_amount,
        financial_progress = %new_progress,
        by = %actor.user_id,
        "financial progress recorded"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::document::FileType;
    use crate::project::test_support::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn invoice() -> SupportingDocument {
        SupportingDocument {
            file_name: "ra-bill-final.pdf".into(),
            original_name: "RA bill final.pdf".into(),
            download_url: "https://files.example/ra-bill-final.pdf".into(),
            storage_path: "projects/PRJ-001/ra-bill-final.pdf".into(),
            file_size: 4096,
            mime_type: "application/pdf".into(),
            file_type: FileType::Document,
            uploaded_at: at(9),
        }
    }

    fn bill(project: &mut Project, amount: Decimal) -> EngineResult<FinancialUpdateRecord> {
        apply_financial_update(
            project,
            &FinancialUpdate::to(amount),
            &je(),
            &ClientInfo::default(),
            at(11),
        )
    }

    #[test]
    fn test_backward_limit_scenario() {
        let mut project = ongoing_project(100_000);

        let first = bill(&mut project, dec!(60000)).unwrap();
        assert_eq!(project.financial_progress(), dec!(60));
        assert_eq!(first.amount_difference, dec!(60000));
        assert_eq!(first.progress_difference, dec!(60));

        let second = bill(&mut project, dec!(58000)).unwrap();
        assert_eq!(second.amount_difference, dec!(-2000));
        assert_eq!(project.financial_progress(), dec!(58));

        let err = bill(&mut project, dec!(40000)).unwrap_err();
        assert_eq!(err.code(), "BACKWARD_NOT_ALLOWED");
        match err {
            EngineError::BackwardNotAllowed {
                current,
                attempted,
                limit,
                ..
            } => {
                assert_eq!(current, dec!(58000));
                assert_eq!(attempted, dec!(40000));
                assert_eq!(limit, dec!(5000));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(project.bill_submitted_amount(), dec!(58000));
        assert_eq!(project.financial_progress_updates().len(), 2);
    }

    #[test]
    fn test_exceeding_cost_rejected() {
        let mut project = ongoing_project(1000);
        let err = bill(&mut project, dec!(1000.01)).unwrap_err();
        assert_eq!(err.code(), "EXCEEDS_ESTIMATED_COST");
        let err = bill(&mut project, dec!(-1)).unwrap_err();
        assert_eq!(err.code(), "EXCEEDS_ESTIMATED_COST");
        assert!(project.financial_progress_updates.is_empty());
    }

    #[test]
    fn test_forward_limit_after_opening_bill() {
        let mut project = ongoing_project(100_000);
        bill(&mut project, dec!(10000)).unwrap();
        let err = bill(&mut project, dec!(60000.01)).unwrap_err();
        assert_eq!(err.code(), "UNREALISTIC_JUMP");
        assert!(bill(&mut project, dec!(60000)).is_ok());
    }

    #[test]
    fn test_final_bill_needs_documents_and_number() {
        let mut project = ongoing_project(100_000);
        bill(&mut project, dec!(60000)).unwrap();

        // 99.5% rounds to 100 and counts as the final bill.
        let err = bill(&mut project, dec!(99500)).unwrap_err();
        assert_eq!(err.code(), "COMPLETION_REQUIRES_DOCUMENTS");

        let err = apply_financial_update(
            &mut project,
            &FinancialUpdate::to(dec!(100000)).with_document(invoice()),
            &je(),
            &ClientInfo::default(),
            at(11),
        )
        .unwrap_err();
        assert_eq!(err.code(), "FINAL_BILL_DETAILS_REQUIRED");

        let record = apply_financial_update(
            &mut project,
            &FinancialUpdate::to(dec!(100000))
                .with_document(invoice())
                .with_bill_number("RA-12/FINAL"),
            &je(),
            &ClientInfo::default(),
            at(11),
        )
        .unwrap();
        assert_eq!(record.new_progress, dec!(100));
        assert_eq!(record.bill_details.bill_number.as_deref(), Some("RA-12/FINAL"));
        assert_eq!(project.financial_progress(), dec!(100));
    }

    #[test]
    fn test_role_and_switch_preconditions() {
        let mut project = ongoing_project(1000);
        let err = apply_financial_update(
            &mut project,
            &FinancialUpdate::to(dec!(10)),
            &actor(Role::Md),
            &ClientInfo::default(),
            at(11),
        )
        .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");

        project.financial_progress_updates_enabled = false;
        assert_eq!(bill(&mut project, dec!(10)).unwrap_err().code(), "UPDATES_DISABLED");
    }

    #[test]
    fn test_zero_cost_project_only_accepts_zero() {
        let mut project = ongoing_project(0);
        let record = bill(&mut project, dec!(0)).unwrap();
        assert_eq!(record.new_progress, dec!(0));
        assert_eq!(
            bill(&mut project, dec!(1)).unwrap_err().code(),
            "EXCEEDS_ESTIMATED_COST"
        );
    }

    proptest! {
        /// After every accepted update the derived percentage matches the
        /// bill and the bill never exceeds the cost.
        #[test]
        fn prop_financial_progress_is_derived(
            cost in 1u32..1_000_000,
            amounts in proptest::collection::vec(0u32..1_100_000, 1..25),
        ) {
            let mut project = ongoing_project(cost as i64);
            for amount in amounts {
                let amount = Decimal::from(amount);
                let before = project.financial_progress_updates().len();
                let _ = bill(&mut project, amount);
                prop_assert!(project.financial_progress_updates().len() >= before);
                prop_assert!(project.bill_submitted_amount() <= project.estimated_cost());
                prop_assert_eq!(
                    project.financial_progress(),
                    financial_percentage(project.bill_submitted_amount(), project.estimated_cost())
                );
            }
        }
    }
}
