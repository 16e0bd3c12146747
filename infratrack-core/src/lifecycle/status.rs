//! Approval lifecycle states.
//!
//! A closed set: the engine never accepts a status it does not know about.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::actor::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    /// Initial state after creation.
    #[serde(rename = "Submitted for Approval")]
    SubmittedForApproval,
    #[serde(rename = "Resubmitted for Approval")]
    ResubmittedForApproval,
    #[serde(rename = "Rejected by AEE")]
    RejectedByAee,
    #[serde(rename = "Rejected by CE")]
    RejectedByCe,
    #[serde(rename = "Rejected by MD")]
    RejectedByMd,
    #[serde(rename = "Ongoing")]
    Ongoing,
    /// Terminal.
    #[serde(rename = "Completed")]
    Completed,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 7] = [
        ProjectStatus::SubmittedForApproval,
        ProjectStatus::ResubmittedForApproval,
        ProjectStatus::RejectedByAee,
        ProjectStatus::RejectedByCe,
        ProjectStatus::RejectedByMd,
        ProjectStatus::Ongoing,
        ProjectStatus::Completed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::SubmittedForApproval => "Submitted for Approval",
            Self::ResubmittedForApproval => "Resubmitted for Approval",
            Self::RejectedByAee => "Rejected by AEE",
            Self::RejectedByCe => "Rejected by CE",
            Self::RejectedByMd => "Rejected by MD",
            Self::Ongoing => "Ongoing",
            Self::Completed => "Completed",
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected_by().is_some()
    }

    /// The approver role whose rejection this status records.
    pub fn rejected_by(&self) -> Option<Role> {
        match self {
            Self::RejectedByAee => Some(Role::Aee),
            Self::RejectedByCe => Some(Role::Ce),
            Self::RejectedByMd => Some(Role::Md),
            _ => None,
        }
    }

    pub fn is_awaiting_approval(&self) -> bool {
        matches!(
            self,
            Self::SubmittedForApproval | Self::ResubmittedForApproval
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    /// Accepts either the display label or the variant name, ignoring case,
    /// spaces and underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalize = |value: &str| {
            value
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        };
        let wanted = normalize(s);
        ProjectStatus::ALL
            .into_iter()
            .find(|status| normalize(status.label()) == wanted)
            .ok_or_else(|| format!("unknown project status '{}'", s))
    }
}
