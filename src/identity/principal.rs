use serde::{Deserialize, Serialize};

/// Subject used by internal callers (graph updates, startup reconciliation).
pub const SYSTEM_SUBJECT: &str = "system";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into(), ..Default::default() }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn system() -> Self { Self::new(SYSTEM_SUBJECT) }
}
