use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_ORG: &str = "default";

/// Internal organization identifier. RBAC rows are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self { OrgId(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for OrgId {
    fn default() -> Self { OrgId(DEFAULT_ORG.to_string()) }
}

impl Display for OrgId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// Maps the human-readable organization named by a request to its internal id.
pub trait OrgResolver: Send + Sync {
    fn resolve(&self, name: Option<&str>) -> StoreResult<OrgId>;
}

/// Resolver backed by a fixed alias table. With no aliases configured, names are used
/// as ids verbatim.
#[derive(Debug, Clone, Default)]
pub struct StaticOrgResolver {
    default_org: OrgId,
    aliases: HashMap<String, OrgId>,
}

impl StaticOrgResolver {
    pub fn new(default_org: impl Into<String>) -> Self {
        Self { default_org: OrgId::new(default_org), aliases: HashMap::new() }
    }

    pub fn with_alias(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.aliases.insert(name.into().to_ascii_lowercase(), OrgId::new(id));
        self
    }
}

impl OrgResolver for StaticOrgResolver {
    fn resolve(&self, name: Option<&str>) -> StoreResult<OrgId> {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(self.default_org.clone());
        };
        if self.aliases.is_empty() {
            return Ok(OrgId::new(name));
        }
        self.aliases
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("organization {name}")))
    }
}
