use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::OrgId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[serde(alias = "unit.read")]
    Read,
    #[serde(alias = "unit.write")]
    Write,
    #[serde(alias = "unit.delete")]
    Delete,
    #[serde(alias = "unit.lock")]
    Lock,
    #[serde(alias = "rbac.manage")]
    Manage,
    /// Wildcard: matches every action.
    #[serde(rename = "*")]
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Lock => "lock",
            Action::Manage => "manage",
            Action::All => "*",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub actions: Vec<Action>,
    /// Exact ids, `*`, or glob patterns such as `dev/*`.
    pub resources: Vec<String>,
    pub effect: Effect,
}

impl PermissionRule {
    pub fn allow(actions: &[Action], resources: &[&str]) -> Self {
        Self { actions: actions.to_vec(), resources: resources.iter().map(|r| r.to_string()).collect(), effect: Effect::Allow }
    }

    pub fn deny(actions: &[Action], resources: &[&str]) -> Self {
        Self { effect: Effect::Deny, ..Self::allow(actions, resources) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<PermissionRule>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    /// Bumped on every save; writers must present the version they read.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAssignment {
    pub subject: String,
    #[serde(default)]
    pub email: String,
    pub org_id: OrgId,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}
