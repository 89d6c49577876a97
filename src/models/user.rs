//! User model - platform accounts gated behind email verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Role codes carried in session and token claims. Accounts that don't
/// pick one are students.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Student,
    Tutor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Tutor => "TUTOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STUDENT" => Ok(Role::Student),
            "TUTOR" => Ok(Role::Tutor),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {s}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User entity.
///
/// `password_hash` is null for OAuth-created accounts; `is_verified`
/// transitions false to true exactly once, via OTP success.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub username: String,
    pub role: String,
    pub is_verified: bool,
    pub oauth_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new unverified user. The email is case-folded so the unique
    /// constraint holds regardless of input casing.
    pub fn new(email: String, password_hash: Option<String>, username: String, role: Role) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash,
            username,
            role: role.as_str().to_string(),
            is_verified: false,
            oauth_id: None,
            created_utc: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Student)
    }

    /// Convert to a response shape without sensitive fields.
    pub fn sanitized(&self) -> UserResponse {
        UserResponse {
            user_id: self.user_id,
            email: self.email.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            is_verified: self.is_verified,
        }
    }
}

/// User response for the API (no password hash, no OAuth id).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub is_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_unverified_and_case_folded() {
        let user = User::new(
            "Alice@Example.COM".to_string(),
            Some("$argon2...".to_string()),
            "alice".to_string(),
            Role::Student,
        );

        assert_eq!(user.email, "alice@example.com");
        assert!(!user.is_verified);
        assert_eq!(user.role(), Role::Student);
    }

    #[test]
    fn sanitized_drops_password_hash() {
        let user = User::new(
            "bob@example.com".to_string(),
            Some("hash".to_string()),
            "bob".to_string(),
            Role::Tutor,
        );

        let resp = user.sanitized();
        assert_eq!(resp.email, "bob@example.com");
        assert_eq!(resp.role, "TUTOR");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("hash"));
    }
}
