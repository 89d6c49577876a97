//! Credential store: user records, OTP records and refresh-token rows.
//!
//! The domain services talk to the `UserStore` trait; `PostgresStore` is
//! the real implementation, `MemoryStore` backs the tests.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{OtpCode, RefreshTokenRecord, User};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// Insert a user and, optionally, an initial token row in a single
    /// all-or-nothing transaction.
    async fn create_user(
        &self,
        user: &User,
        initial_token: Option<&RefreshTokenRecord>,
    ) -> Result<(), AppError>;

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), AppError>;

    /// Store an OTP record, replacing any prior record for the user.
    async fn upsert_otp(&self, otp: &OtpCode) -> Result<(), AppError>;
    async fn get_otp(&self, user_id: Uuid) -> Result<Option<OtpCode>, AppError>;
    async fn delete_otp(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;
    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;
    async fn delete_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), AppError>;
    async fn delete_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_user(
        &self,
        user: &User,
        initial_token: Option<&RefreshTokenRecord>,
    ) -> Result<(), AppError> {
        let mut txn = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, username, role, is_verified, oauth_id, created_utc)
            VALUES ($1, LOWER($2), $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.username)
        .bind(&user.role)
        .bind(user.is_verified)
        .bind(&user.oauth_id)
        .bind(user.created_utc)
        .execute(&mut *txn)
        .await;

        if let Err(e) = result {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return Err(AppError::Conflict("Email already exists"));
                }
            }
            return Err(e.into());
        }

        if let Some(record) = initial_token {
            insert_token_row(&mut txn, record).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_verified = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_otp(&self, otp: &OtpCode) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO otp_codes (user_id, otp_hash, expires_utc, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET otp_hash = $2, expires_utc = $3, created_utc = $4
            "#,
        )
        .bind(otp.user_id)
        .bind(&otp.otp_hash)
        .bind(otp.expires_utc)
        .bind(otp.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_otp(&self, user_id: Uuid) -> Result<Option<OtpCode>, AppError> {
        let otp = sqlx::query_as::<_, OtpCode>("SELECT * FROM otp_codes WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(otp)
    }

    async fn delete_otp(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM otp_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        let mut txn = self.pool.begin().await?;
        insert_token_row(&mut txn, record).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT * FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_token_row(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &RefreshTokenRecord,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (token_id, user_id, token_type, token_hash, expires_utc,
             ip_address, user_agent, device_name, device_type, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(record.token_id)
    .bind(record.user_id)
    .bind(&record.token_type)
    .bind(&record.token_hash)
    .bind(record.expires_utc)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .bind(&record.device_name)
    .bind(&record.device_type)
    .bind(record.created_utc)
    .execute(&mut **txn)
    .await?;
    Ok(())
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    otps: Mutex<HashMap<Uuid, OtpCode>>,
    tokens: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = email.to_lowercase();
        let users = self.users.lock().map_err(lock_err)?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let users = self.users.lock().map_err(lock_err)?;
        Ok(users.get(&user_id).cloned())
    }

    async fn create_user(
        &self,
        user: &User,
        initial_token: Option<&RefreshTokenRecord>,
    ) -> Result<(), AppError> {
        let mut users = self.users.lock().map_err(lock_err)?;
        if users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already exists"));
        }
        users.insert(user.user_id, user.clone());
        if let Some(record) = initial_token {
            self.tokens
                .lock()
                .map_err(lock_err)?
                .insert(record.token_hash.clone(), record.clone());
        }
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut users = self.users.lock().map_err(lock_err)?;
        if let Some(user) = users.get_mut(&user_id) {
            user.is_verified = true;
        }
        Ok(())
    }

    async fn upsert_otp(&self, otp: &OtpCode) -> Result<(), AppError> {
        self.otps
            .lock()
            .map_err(lock_err)?
            .insert(otp.user_id, otp.clone());
        Ok(())
    }

    async fn get_otp(&self, user_id: Uuid) -> Result<Option<OtpCode>, AppError> {
        Ok(self.otps.lock().map_err(lock_err)?.get(&user_id).cloned())
    }

    async fn delete_otp(&self, user_id: Uuid) -> Result<(), AppError> {
        self.otps.lock().map_err(lock_err)?.remove(&user_id);
        Ok(())
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        self.tokens
            .lock()
            .map_err(lock_err)?
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self
            .tokens
            .lock()
            .map_err(lock_err)?
            .get(token_hash)
            .cloned())
    }

    async fn delete_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), AppError> {
        self.tokens.lock().map_err(lock_err)?.remove(token_hash);
        Ok(())
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        self.tokens
            .lock()
            .map_err(lock_err)?
            .retain(|_, r| r.user_id != user_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> AppError {
    AppError::Internal(anyhow::anyhow!("Store mutex poisoned"))
}
