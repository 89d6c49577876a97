//! Account registration, password login and refresh-token lifecycle.
//!
//! Session cookies are managed by the HTTP layer through `SessionManager`;
//! this service owns credentials and token rows.

use std::sync::Arc;

use crate::error::AppError;
use crate::models::{DeviceMeta, RefreshTokenRecord, Role, TokenType, User};
use crate::services::jwt::{JwtService, TokenResponse};
use crate::services::otp::OtpService;
use crate::store::UserStore;
use crate::utils::password::{hash_secret, verify_secret, Secret, SecretHash};

pub struct AuthService {
    store: Arc<dyn UserStore>,
    jwt: Arc<JwtService>,
    otp: Arc<OtpService>,
}

/// Tokens issued at login. The refresh token travels back to the client
/// exactly once; only its hash stays server-side.
#[derive(Debug)]
pub struct IssuedTokens {
    pub access: TokenResponse,
    pub refresh_token: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn UserStore>, jwt: Arc<JwtService>, otp: Arc<OtpService>) -> Self {
        Self { store, jwt, otp }
    }

    /// Create an unverified account and issue its first verification code.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
        role: Role,
    ) -> Result<User, AppError> {
        let password_hash = hash_secret(&Secret::new(password.to_string()))?;
        let user = User::new(
            email.to_string(),
            Some(password_hash.into_string()),
            username.to_string(),
            role,
        );

        self.store.create_user(&user, None).await?;
        self.otp.request_otp(&user.email).await?;

        tracing::info!(user_id = %user.user_id, "User registered");
        Ok(user)
    }

    /// Verify credentials and issue tokens.
    ///
    /// Unknown email and wrong password return the same error, so the
    /// response cannot be used to probe which addresses have accounts.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: DeviceMeta,
    ) -> Result<(User, IssuedTokens), AppError> {
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let stored_hash = user
            .password_hash
            .as_deref()
            .ok_or(AppError::InvalidCredentials)?;

        verify_secret(
            &Secret::new(password.to_string()),
            &SecretHash::new(stored_hash.to_string()),
        )
        .map_err(|_| AppError::InvalidCredentials)?;

        if !user.is_verified {
            return Err(AppError::EmailNotVerified);
        }

        let tokens = self.issue_tokens(&user, device).await?;
        tracing::info!(user_id = %user.user_id, "User logged in");
        Ok((user, tokens))
    }

    /// Mint an access and refresh token pair, persisting the refresh-token
    /// hash row with the caller's device metadata.
    pub async fn issue_tokens(
        &self,
        user: &User,
        device: DeviceMeta,
    ) -> Result<IssuedTokens, AppError> {
        let refresh_token = self.jwt.generate_refresh_token(user.user_id, &user.role)?;
        let record = RefreshTokenRecord::new(
            user.user_id,
            TokenType::Refresh,
            &refresh_token,
            self.jwt.refresh_token_expiry_days(),
            device,
        );
        self.store.insert_refresh_token(&record).await?;

        let access_token = self.jwt.generate_access_token(user.user_id, &user.role)?;
        Ok(IssuedTokens {
            access: TokenResponse {
                access_token,
                token_type: "Bearer".to_string(),
                expires_in: self.jwt.access_token_expiry_seconds(),
            },
            refresh_token,
        })
    }

    /// Exchange a refresh token for a fresh access token.
    ///
    /// The signature check alone is not enough: the hash row must still
    /// exist, so revocation by logout takes effect even before the token's
    /// own expiry. The refresh token itself is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;

        let token_hash = RefreshTokenRecord::hash_token(refresh_token);
        let record = self
            .store
            .find_refresh_token_by_hash(&token_hash)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if record.is_expired() {
            self.store.delete_refresh_token_by_hash(&token_hash).await?;
            return Err(AppError::InvalidToken);
        }

        let user_id: uuid::Uuid = claims
            .sub
            .parse()
            .map_err(|_| AppError::InvalidToken)?;

        let access_token = self.jwt.generate_access_token(user_id, &claims.role)?;
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Revoke a single refresh token by deleting its hash row. Unknown or
    /// already-deleted tokens are a no-op.
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), AppError> {
        let token_hash = RefreshTokenRecord::hash_token(refresh_token);
        self.store.delete_refresh_token_by_hash(&token_hash).await
    }

    /// Revoke every refresh token a user holds (logout-all).
    pub async fn revoke_all_refresh_tokens(&self, user_id: uuid::Uuid) -> Result<(), AppError> {
        self.store.delete_refresh_tokens_for_user(user_id).await
    }

    pub async fn get_user(&self, user_id: uuid::Uuid) -> Result<User, AppError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound("User not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::queue::{EmailQueue, MemoryEmailQueue};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryEmailQueue>,
        service: AuthService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryEmailQueue::new());
        let jwt = Arc::new(JwtService::new(&JwtConfig {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        }));
        let otp = Arc::new(OtpService::new(
            Arc::clone(&store) as Arc<dyn UserStore>,
            Arc::clone(&queue) as Arc<dyn EmailQueue>,
            10,
        ));
        let service = AuthService::new(Arc::clone(&store) as Arc<dyn UserStore>, jwt, otp);
        Fixture {
            store,
            queue,
            service,
        }
    }

    async fn register_verified(f: &Fixture, email: &str, password: &str) -> User {
        let user = f
            .service
            .register(email, password, "tester", Role::Student)
            .await
            .unwrap();
        f.store.mark_email_verified(user.user_id).await.unwrap();
        f.service.get_user(user.user_id).await.unwrap()
    }

    #[tokio::test]
    async fn register_creates_unverified_user_and_queues_otp() {
        let f = fixture();
        let user = f
            .service
            .register("New@Example.com", "s3cret-pass", "newbie", Role::Tutor)
            .await
            .unwrap();

        assert_eq!(user.email, "new@example.com");
        assert!(!user.is_verified);
        assert_eq!(f.queue.queued_len(), 1);
        assert!(f.store.get_otp(user.user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let f = fixture();
        f.service
            .register("a@example.com", "pass-one", "a", Role::Student)
            .await
            .unwrap();

        assert!(matches!(
            f.service
                .register("A@EXAMPLE.COM", "pass-two", "b", Role::Student)
                .await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let f = fixture();
        register_verified(&f, "a@example.com", "correct-password").await;

        let unknown = f
            .service
            .login("nobody@example.com", "whatever", DeviceMeta::default())
            .await
            .unwrap_err();
        let wrong = f
            .service
            .login("a@example.com", "wrong-password", DeviceMeta::default())
            .await
            .unwrap_err();

        assert!(matches!(unknown, AppError::InvalidCredentials));
        assert!(matches!(wrong, AppError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn unverified_user_cannot_login() {
        let f = fixture();
        f.service
            .register("a@example.com", "correct-password", "a", Role::Student)
            .await
            .unwrap();

        assert!(matches!(
            f.service
                .login("a@example.com", "correct-password", DeviceMeta::default())
                .await,
            Err(AppError::EmailNotVerified)
        ));
    }

    #[tokio::test]
    async fn login_issues_tokens_and_persists_refresh_hash() {
        let f = fixture();
        register_verified(&f, "a@example.com", "correct-password").await;

        let (user, tokens) = f
            .service
            .login(
                "a@example.com",
                "correct-password",
                DeviceMeta {
                    ip_address: Some("203.0.113.9".to_string()),
                    user_agent: Some("Mozilla/5.0".to_string()),
                    ..DeviceMeta::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(tokens.access.token_type, "Bearer");
        assert_eq!(tokens.access.expires_in, 15 * 60);

        let hash = RefreshTokenRecord::hash_token(&tokens.refresh_token);
        let record = f
            .store
            .find_refresh_token_by_hash(&hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.user_id, user.user_id);
        assert_eq!(record.ip_address.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn refresh_mints_access_token_without_rotation() {
        let f = fixture();
        register_verified(&f, "a@example.com", "correct-password").await;
        let (_, tokens) = f
            .service
            .login("a@example.com", "correct-password", DeviceMeta::default())
            .await
            .unwrap();

        let first = f.service.refresh(&tokens.refresh_token).await.unwrap();
        assert!(!first.access_token.is_empty());

        // Same refresh token keeps working until revoked.
        let second = f.service.refresh(&tokens.refresh_token).await.unwrap();
        assert!(!second.access_token.is_empty());
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_rejected_despite_valid_signature() {
        let f = fixture();
        register_verified(&f, "a@example.com", "correct-password").await;
        let (_, tokens) = f
            .service
            .login("a@example.com", "correct-password", DeviceMeta::default())
            .await
            .unwrap();

        f.service
            .revoke_refresh_token(&tokens.refresh_token)
            .await
            .unwrap();

        assert!(matches!(
            f.service.refresh(&tokens.refresh_token).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn revoke_all_clears_every_device() {
        let f = fixture();
        let user = register_verified(&f, "a@example.com", "correct-password").await;

        let (_, first) = f
            .service
            .login("a@example.com", "correct-password", DeviceMeta::default())
            .await
            .unwrap();
        let (_, second) = f
            .service
            .login("a@example.com", "correct-password", DeviceMeta::default())
            .await
            .unwrap();

        f.service.revoke_all_refresh_tokens(user.user_id).await.unwrap();

        assert!(matches!(
            f.service.refresh(&first.refresh_token).await,
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            f.service.refresh(&second.refresh_token).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn garbage_refresh_token_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.service.refresh("not-a-jwt").await,
            Err(AppError::InvalidToken)
        ));
    }
}
