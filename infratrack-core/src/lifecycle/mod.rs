//! Project approval lifecycle.
//!
//! - `status`: the closed set of lifecycle states
//! - `transition`: the role-gated transition table and `change_status`
//! - `editable`: the independent editable lock

pub mod editable;
pub mod status;
pub mod transition;

pub use editable::set_editable;
pub use status::ProjectStatus;
pub use transition::{
    allowed_targets, change_status, is_allowed, validate_status_change, StatusChange,
    TransitionRule, AUTO_COMPLETION_REMARK, TRANSITION_TABLE,
};
