//! Error types for the project engine.
//!
//! Every rule violation is raised before the aggregate is touched, so an
//! `EngineError` always means "nothing was applied". Each variant carries the
//! values a caller needs to render a precise message (current value, attempted
//! value, limit).

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::actor::Role;
use crate::lifecycle::ProjectStatus;

/// Which ledger a ledger-level error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Physical,
    Financial,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical => write!(f, "physical progress"),
            Self::Financial => write!(f, "financial progress"),
        }
    }
}

/// Error taxonomy used by callers to pick a response (retry, re-prompt, 4xx, 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input (range or shape violations).
    Validation,
    /// Wrong role or wrong state for the actor.
    Authorization,
    /// Backward limit, jump limit, missing documents, over budget.
    BusinessRule,
    /// Target already reached, concurrent version mismatch, duplicate keys.
    Conflict,
    /// Unknown project reference.
    NotFound,
    /// Persistence timeout or unavailability; safe to retry.
    Transient,
    /// Corruption or programming error.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("role {role} is not allowed to {action}")]
    Unauthorized { role: Role, action: &'static str },

    #[error("{ledger} updates are disabled for this project")]
    UpdatesDisabled { ledger: LedgerKind },

    #[error("role {role} cannot move a project from '{from}' to '{to}'")]
    InvalidTransition {
        role: Role,
        from: ProjectStatus,
        to: ProjectStatus,
    },

    #[error("a rejection reason is required to move a project to '{to}'")]
    RejectionReasonRequired { to: ProjectStatus },

    #[error("{field} is already {value}")]
    NoOp { field: &'static str, value: String },

    #[error("{ledger} cannot decrease from {current} to {attempted} (maximum decrease is {limit})")]
    BackwardNotAllowed {
        ledger: LedgerKind,
        current: Decimal,
        attempted: Decimal,
        limit: Decimal,
    },

    #[error("{ledger} cannot increase from {current} to {attempted} in one update (maximum increase is {limit})")]
    UnrealisticJump {
        ledger: LedgerKind,
        current: Decimal,
        attempted: Decimal,
        limit: Decimal,
    },

    #[error("reaching 100% {ledger} requires at least one supporting document")]
    CompletionRequiresDocuments { ledger: LedgerKind },

    #[error("the final bill requires a bill number")]
    FinalBillDetailsRequired,

    #[error("bill amount {attempted} is outside 0 to the estimated cost {estimated_cost}")]
    ExceedsEstimatedCost {
        attempted: Decimal,
        estimated_cost: Decimal,
    },

    #[error("project {project_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        project_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("operation {key} was already applied to project {project_id}")]
    DuplicateOperation { project_id: String, key: String },

    #[error("project {project_id} already exists")]
    ProjectExists { project_id: String },

    #[error("project {project_id} not found")]
    ProjectNotFound { project_id: String },

    #[error("transaction did not commit within {timeout_ms}ms")]
    TransactionTimeout { timeout_ms: u64 },

    #[error("storage unavailable during {operation}: {message}")]
    StorageUnavailable { operation: String, message: String },

    #[error("storage failure during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    pub fn no_op(field: &'static str, value: impl fmt::Display) -> Self {
        Self::NoOp {
            field,
            value: value.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::UpdatesDisabled { .. } => "UPDATES_DISABLED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::RejectionReasonRequired { .. } => "REJECTION_REASON_REQUIRED",
            Self::NoOp { .. } => "NO_OP",
            Self::BackwardNotAllowed { .. } => "BACKWARD_NOT_ALLOWED",
            Self::UnrealisticJump { .. } => "UNREALISTIC_JUMP",
            Self::CompletionRequiresDocuments { .. } => "COMPLETION_REQUIRES_DOCUMENTS",
            Self::FinalBillDetailsRequired => "FINAL_BILL_DETAILS_REQUIRED",
            Self::ExceedsEstimatedCost { .. } => "EXCEEDS_ESTIMATED_COST",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::DuplicateOperation { .. } => "DUPLICATE_OPERATION",
            Self::ProjectExists { .. } => "PROJECT_EXISTS",
            Self::ProjectNotFound { .. } => "PROJECT_NOT_FOUND",
            Self::TransactionTimeout { .. } => "TRANSACTION_TIMEOUT",
            Self::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            Self::Storage { .. } => "STORAGE_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidValue { .. } | Self::RejectionReasonRequired { .. } => {
                ErrorKind::Validation
            }
            Self::Unauthorized { .. }
            | Self::UpdatesDisabled { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Authorization,
            Self::BackwardNotAllowed { .. }
            | Self::UnrealisticJump { .. }
            | Self::CompletionRequiresDocuments { .. }
            | Self::FinalBillDetailsRequired
            | Self::ExceedsEstimatedCost { .. } => ErrorKind::BusinessRule,
            Self::NoOp { .. }
            | Self::VersionConflict { .. }
            | Self::DuplicateOperation { .. }
            | Self::ProjectExists { .. } => ErrorKind::Conflict,
            Self::ProjectNotFound { .. } => ErrorKind::NotFound,
            Self::TransactionTimeout { .. } | Self::StorageUnavailable { .. } => {
                ErrorKind::Transient
            }
            Self::Storage { .. } | Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
