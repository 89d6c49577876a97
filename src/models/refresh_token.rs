//! Refresh-token records: only a one-way hash of the issued token is
//! stored, so a leaked database cannot be used to forge credentials.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Token purpose codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    Refresh,
    ResetPassword,
    EmailVerification,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Refresh => "REFRESH",
            TokenType::ResetPassword => "RESET_PASSWORD",
            TokenType::EmailVerification => "EMAIL_VERIFICATION",
        }
    }
}

/// Device metadata captured at issuance, for audit and selective
/// revocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
}

/// Stored token row. Logically revoked once deleted or past `expires_utc`.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_type: String,
    pub token_hash: String,
    pub expires_utc: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Create a record from a raw token. The raw token is hashed here and
    /// never stored.
    pub fn new(
        user_id: Uuid,
        token_type: TokenType,
        raw_token: &str,
        expires_in_days: i64,
        device: DeviceMeta,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_type: token_type.as_str().to_string(),
            token_hash: Self::hash_token(raw_token),
            expires_utc: now + Duration::days(expires_in_days),
            ip_address: device.ip_address,
            user_agent: device.user_agent,
            device_name: device.device_name,
            device_type: device.device_type,
            created_utc: now,
        }
    }

    /// Hash a token using SHA-256.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_utc
    }
}
