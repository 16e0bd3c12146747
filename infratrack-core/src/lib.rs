//! Lifecycle and progress tracking for infrastructure projects.
//!
//! Everything in this crate is synchronous and free of I/O. Operations take a
//! `&mut Project`, check every business rule first, and only then mutate the
//! project and append the matching history record. Persistence, locking and
//! transactions live in `infratrack-server`.

pub mod actor;
pub mod document;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod pagination;
pub mod project;
pub mod records;
pub mod views;

pub use actor::{Actor, ClientInfo, Role, UpdatedBy};
pub use document::{FileType, SupportingDocument};
pub use error::{EngineError, EngineResult, ErrorKind, LedgerKind};
pub use ledger::{
    advisories_at, apply_combined_update, apply_financial_update, apply_progress_update,
    financial_percentage, set_updates_enabled, Advisory, AutoCompletion, CombinedOutcome,
    CombinedUpdate, FinancialUpdate, ProgressOutcome, ProgressUpdate,
};
pub use lifecycle::{change_status, set_editable, ProjectStatus, StatusChange};
pub use pagination::{page_most_recent_first, Page, PageRequest, Pagination};
pub use project::{HistoryLengths, NewProject, Project, ProjectId, WorkflowStamps};
pub use records::{
    BillDetails, EditableStatusHistoryEntry, FinancialUpdateRecord, HistoryKind, HistoryRecord,
    ProgressUpdateRecord, StatusHistoryEntry,
};
pub use views::{project_summary, ProjectSummary};
