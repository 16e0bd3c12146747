//! Identity supplied by the (external) authentication layer.
//!
//! The engine trusts who the caller says they are, but checks that their role
//! is allowed to perform the requested action.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Organisational role of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Junior Engineer: creates projects and records progress.
    #[serde(rename = "JE")]
    Je,
    /// Assistant Executive Engineer.
    #[serde(rename = "AEE")]
    Aee,
    /// Chief Engineer.
    #[serde(rename = "CE")]
    Ce,
    /// Managing Director.
    #[serde(rename = "MD")]
    Md,
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "SUPERADMIN")]
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Je,
        Role::Aee,
        Role::Ce,
        Role::Md,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Je => "JE",
            Self::Aee => "AEE",
            Self::Ce => "CE",
            Self::Md => "MD",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPERADMIN",
        }
    }

    /// Roles that may flip the editable lock and the ledger switches.
    pub fn can_administer(&self) -> bool {
        matches!(self, Self::Md | Self::Admin | Self::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace(['-', '_', ' '], "");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| format!("unknown role '{}'", s))
    }
}

/// The authenticated identity performing a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            role,
        }
    }

    /// Snapshot of the actor embedded in ledger records.
    pub fn as_updated_by(&self) -> UpdatedBy {
        UpdatedBy {
            user_id: self.user_id.clone(),
            user_name: self.display_name.clone(),
            user_designation: self.role.to_string(),
        }
    }
}

/// Who made a change, frozen at the time the record was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedBy {
    pub user_id: String,
    pub user_name: String,
    pub user_designation: String,
}

/// Request metadata copied into every audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}
