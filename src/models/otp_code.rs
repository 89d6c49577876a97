//! OTP record - at most one live code per user.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored OTP record, attached 1:1 to a user. Overwritten on resend,
/// deleted on successful verification or expiry detection.
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub user_id: Uuid,
    pub otp_hash: String,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl OtpCode {
    pub fn new(user_id: Uuid, otp_hash: String, expiry_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            otp_hash,
            expires_utc: now + Duration::minutes(expiry_minutes),
            created_utc: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_utc
    }
}

/// Generate a 6-digit numeric code, uniform over 000000..=999999 with
/// leading zeros preserved.
pub fn generate_code() -> String {
    use rand::Rng;
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}
