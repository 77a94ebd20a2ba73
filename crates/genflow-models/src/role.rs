//! Caller roles carried by verified access tokens.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Authorization role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular end user, scoped to their own tenant
    #[default]
    User,
    /// Operator with cross-tenant visibility
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parse a role claim, falling back to the least-privileged role.
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}
