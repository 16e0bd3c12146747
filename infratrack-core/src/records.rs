//! Append-only audit records.
//!
//! Once a record is pushed onto a project's history it is never edited or
//! removed; the aggregate only hands out shared slices of its histories.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::{ClientInfo, UpdatedBy};
use crate::document::SupportingDocument;
use crate::lifecycle::ProjectStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateRecord {
    pub id: Uuid,
    pub previous_progress: Decimal,
    pub new_progress: Decimal,
    pub progress_difference: Decimal,
    pub remarks: Option<String>,
    pub supporting_documents: Vec<SupportingDocument>,
    pub updated_by: UpdatedBy,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bill metadata attached to a financial update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillDetails {
    pub bill_number: Option<String>,
    pub bill_date: Option<NaiveDate>,
    pub bill_description: Option<String>,
}

impl BillDetails {
    pub fn has_bill_number(&self) -> bool {
        self.bill_number
            .as_deref()
            .is_some_and(|number| !number.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialUpdateRecord {
    pub id: Uuid,
    pub previous_progress: Decimal,
    pub new_progress: Decimal,
    pub progress_difference: Decimal,
    pub previous_bill_amount: Decimal,
    pub new_bill_amount: Decimal,
    pub amount_difference: Decimal,
    pub bill_details: BillDetails,
    pub remarks: Option<String>,
    pub supporting_documents: Vec<SupportingDocument>,
    pub updated_by: UpdatedBy,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub previous_status: ProjectStatus,
    pub new_status: ProjectStatus,
    pub changed_by: UpdatedBy,
    pub remarks: Option<String>,
    pub rejection_reason: Option<String>,
    /// Set when the engine fired the transition itself (auto-completion).
    #[serde(default)]
    pub automatic: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditableStatusHistoryEntry {
    pub id: Uuid,
    pub previous_status: bool,
    pub new_status: bool,
    pub changed_by: UpdatedBy,
    pub reason: Option<String>,
    #[serde(default)]
    pub automatic: bool,
    pub changed_at: DateTime<Utc>,
}

/// Which history a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Progress,
    Financial,
    Status,
    Editable,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Financial => "financial",
            Self::Status => "status",
            Self::Editable => "editable",
        }
    }
}

/// A record of any history, used when mirroring appends into storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum HistoryRecord {
    Progress(ProgressUpdateRecord),
    Financial(FinancialUpdateRecord),
    Status(StatusHistoryEntry),
    Editable(EditableStatusHistoryEntry),
}

impl HistoryRecord {
    pub fn kind(&self) -> HistoryKind {
        match self {
            Self::Progress(_) => HistoryKind::Progress,
            Self::Financial(_) => HistoryKind::Financial,
            Self::Status(_) => HistoryKind::Status,
            Self::Editable(_) => HistoryKind::Editable,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Progress(r) => r.id,
            Self::Financial(r) => r.id,
            Self::Status(r) => r.id,
            Self::Editable(r) => r.id,
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            Self::Progress(r) => r.created_at,
            Self::Financial(r) => r.created_at,
            Self::Status(r) => r.created_at,
            Self::Editable(r) => r.changed_at,
        }
    }
}

pub(crate) fn new_record_id() -> Uuid {
    Uuid::new_v4()
}

pub(crate) fn client_fields(client: &ClientInfo) -> (Option<String>, Option<String>) {
    (client.ip_address.clone(), client.user_agent.clone())
}
