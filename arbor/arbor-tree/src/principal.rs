//! Principal identity as supplied by the identity collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque principal id scoped by its identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId {
    pub opaque_id: String,
    #[serde(default)]
    pub idp: String,
}

impl PrincipalId {
    pub fn new(opaque_id: impl Into<String>, idp: impl Into<String>) -> Self {
        Self {
            opaque_id: opaque_id.into(),
            idp: idp.into(),
        }
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.idp.is_empty() {
            write!(f, "{}", self.opaque_id)
        } else {
            write!(f, "{}@{}", self.opaque_id, self.idp)
        }
    }
}

/// The attributes of a user the engine needs for homes and ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub display_name: String,
}

impl Principal {
    /// Create a principal with only an id.
    pub fn new(id: PrincipalId) -> Self {
        Self {
            id,
            username: String::new(),
            mail: String::new(),
            display_name: String::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_mail(mut self, mail: impl Into<String>) -> Self {
        self.mail = mail.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}
