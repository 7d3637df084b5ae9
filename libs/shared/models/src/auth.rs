use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
    /// Internal workflows (gateway reconciliation, treatment recording).
    System,
}

impl Role {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("doctor") => Role::Doctor,
            Some("admin") => Role::Admin,
            _ => Role::Patient,
        }
    }
}

/// The identity a service call acts on behalf of.
///
/// Services never read identity from ambient request state; handlers
/// resolve it from the authenticated [`User`] and pass it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn patient(id: Uuid) -> Self {
        Self::new(id, Role::Patient)
    }

    pub fn doctor(id: Uuid) -> Self {
        Self::new(id, Role::Doctor)
    }

    pub fn system() -> Self {
        Self::new(Uuid::nil(), Role::System)
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::System)
    }
}

impl TryFrom<&User> for Actor {
    type Error = AppError;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))?;
        Ok(Actor::new(id, Role::parse(user.role.as_deref())))
    }
}
