use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;
use crate::error::AppError;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_email(&self, to_email: &str, otp: &str) -> Result<(), AppError>;
}

/// SMTP mail transport.
#[derive(Clone)]
pub struct SmtpEmailService {
    mailer: SmtpTransport,
    from_address: String,
}

impl SmtpEmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from_address.parse().map_err(
                |e: lettre::address::AddressError| AppError::Internal(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::Internal(e.into()),
            )?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| AppError::Internal(e.into()))?;

        // Send on the blocking pool so the SMTP round-trip never stalls the
        // async runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(AppError::Email(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailService {
    async fn send_verification_email(&self, to_email: &str, otp: &str) -> Result<(), AppError> {
        let html_body = format!(
            r#"<html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Email Verification</h2>
                    <p>Your verification code is:</p>
                    <h1 style="letter-spacing:4px">{otp}</h1>
                    <p>This code expires in 10 minutes. If you didn't request this, please ignore this email.</p>
                </body>
            </html>"#
        );

        let plain_body = format!(
            "Email Verification\n\nYour verification code is: {otp}\n\nThis code expires in 10 minutes. If you didn't request this, please ignore this email."
        );

        self.send_email(to_email, "Your verification code", &plain_body, &html_body)
            .await
    }
}

/// Mock provider for tests; records every send and can be made to fail a
/// configured number of times.
#[derive(Default)]
pub struct MockEmailService {
    pub sent: Mutex<Vec<(String, String)>>,
    pub failures_remaining: Mutex<u32>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(n: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures_remaining: Mutex::new(n),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_email(&self, to_email: &str, otp: &str) -> Result<(), AppError> {
        {
            let mut failures = self
                .failures_remaining
                .lock()
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Mock mutex poisoned: {e}")))?;
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Email("simulated transport failure".to_string()));
            }
        }

        self.sent
            .lock()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Mock mutex poisoned: {e}")))?
            .push((to_email.to_string(), otp.to_string()));
        Ok(())
    }
}
