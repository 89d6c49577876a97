pub mod otp_code;
pub mod refresh_token;
pub mod user;

pub use otp_code::OtpCode;
pub use refresh_token::{DeviceMeta, RefreshTokenRecord, TokenType};
pub use user::{Role, User, UserResponse};
