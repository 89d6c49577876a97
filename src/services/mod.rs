pub mod auth;
pub mod email;
pub mod jwt;
pub mod otp;
pub mod session;

pub use auth::{AuthService, IssuedTokens};
pub use email::{EmailProvider, MockEmailService, SmtpEmailService};
pub use jwt::{JwtService, TokenResponse};
pub use otp::OtpService;
pub use session::{MemorySessions, RedisSessions, SessionData, SessionManager, SessionStore};
