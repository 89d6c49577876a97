//! Email-verification OTP flow.
//!
//! At most one live code exists per user: requesting a new code overwrites
//! the previous record, and a successful verification consumes it. Codes
//! are stored as Argon2 hashes and delivered through the email queue.

use std::sync::Arc;

use crate::error::AppError;
use crate::models::{otp_code, OtpCode, User};
use crate::queue::{EmailJob, EmailQueue};
use crate::store::UserStore;
use crate::utils::password::{hash_secret, verify_secret, Secret, SecretHash};

pub struct OtpService {
    store: Arc<dyn UserStore>,
    queue: Arc<dyn EmailQueue>,
    expiry_minutes: i64,
}

impl OtpService {
    pub fn new(store: Arc<dyn UserStore>, queue: Arc<dyn EmailQueue>, expiry_minutes: i64) -> Self {
        Self {
            store,
            queue,
            expiry_minutes,
        }
    }

    /// Issue a verification code for an unverified account and queue its
    /// delivery. Any previously issued code stops working immediately.
    pub async fn request_otp(&self, email: &str) -> Result<(), AppError> {
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(AppError::NotFound("User not found"))?;

        if user.is_verified {
            return Err(AppError::AlreadyVerified);
        }

        let code = otp_code::generate_code();
        let hash = hash_secret(&Secret::new(code.clone()))?;
        let record = OtpCode::new(user.user_id, hash.into_string(), self.expiry_minutes);

        // The record must be durable before delivery is scheduled, so a
        // received email always refers to a code that can verify.
        self.store.upsert_otp(&record).await?;
        self.queue
            .enqueue(&EmailJob::verification(user.user_id, user.email.clone(), code))
            .await?;

        tracing::info!(user_id = %user.user_id, "Verification code issued");
        Ok(())
    }

    /// Check a submitted code and, on success, mark the account verified
    /// and consume the record. A wrong guess leaves the record in place;
    /// an expired record is deleted on detection.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<User, AppError> {
        let mut user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(AppError::NotFound("User not found"))?;

        if user.is_verified {
            return Err(AppError::AlreadyVerified);
        }

        let record = self
            .store
            .get_otp(user.user_id)
            .await?
            .ok_or(AppError::NoActiveOtp)?;

        if record.is_expired() {
            self.store.delete_otp(user.user_id).await?;
            return Err(AppError::OtpExpired);
        }

        if verify_secret(
            &Secret::new(code.to_string()),
            &SecretHash::new(record.otp_hash.clone()),
        )
        .is_err()
        {
            return Err(AppError::InvalidOtp);
        }

        self.store.mark_email_verified(user.user_id).await?;
        self.store.delete_otp(user.user_id).await?;
        user.is_verified = true;

        tracing::info!(user_id = %user.user_id, "Email verified");
        Ok(user)
    }
}
