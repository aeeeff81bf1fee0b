use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::paths;
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Role of a user record. Roles this crate does not know are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    User,
    Other(String),
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "admin" => Role::Admin,
            "user" => Role::User,
            _ => Role::Other(raw),
        }
    }
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        Role::from(raw.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => "admin".into(),
            Role::User => "user".into(),
            Role::Other(s) => s,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::User => f.write_str("user"),
            Role::Other(s) => f.write_str(s),
        }
    }
}

fn default_role() -> Role {
    Role::User
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

impl User {
    fn from_record(id: &str, raw: &Value) -> Option<Self> {
        match serde_json::from_value::<User>(raw.clone()) {
            Ok(mut user) => {
                user.id = id.to_string();
                Some(user)
            }
            Err(e) => {
                warn!(user = %id, error = %e, "skipping unreadable user record");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UserDirectory
// ---------------------------------------------------------------------------

/// Read-only view of `users/{id}`, used to put names on member ids.
#[derive(Clone)]
pub struct UserDirectory {
    store: EntityStore,
    fallback_name: String,
}

impl UserDirectory {
    pub fn new(store: EntityStore, fallback_name: impl Into<String>) -> Self {
        Self {
            store,
            fallback_name: fallback_name.into(),
        }
    }

    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        let path = paths::user(user_id)?;
        Ok(self
            .store
            .read(&path)?
            .and_then(|raw| User::from_record(user_id, &raw)))
    }

    /// The user's name, or the configured fallback when there is none.
    pub fn display_name(&self, user_id: &str) -> Result<String> {
        Ok(self
            .get(user_id)?
            .map(|u| u.name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.fallback_name.clone()))
    }

    /// All users, optionally restricted to one role, ordered by name.
    pub fn list(&self, role: Option<&Role>) -> Result<Vec<User>> {
        let Some(Value::Object(records)) = self.store.read(&paths::users())? else {
            return Ok(Vec::new());
        };
        let mut users: Vec<User> = records
            .iter()
            .filter_map(|(id, raw)| User::from_record(id, raw))
            .filter(|u| role.map_or(true, |r| &u.role == r))
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }
}
