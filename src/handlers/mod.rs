pub mod auth;
pub mod otp;
pub mod user;

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::Environment;
use crate::AppState;

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Session cookie: opaque id only, HttpOnly, scoped to the whole site.
pub fn session_cookie(state: &AppState, session_id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(state.config.session.cookie_name.clone(), session_id);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(state.config.environment == Environment::Prod);
    cookie.set_max_age(time::Duration::days(state.config.session.ttl_days));
    cookie
}

/// Refresh-token cookie: only ever sent back to the auth endpoints.
pub fn refresh_cookie(state: &AppState, refresh_token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, refresh_token);
    cookie.set_http_only(true);
    cookie.set_path("/auth");
    cookie.set_same_site(SameSite::Strict);
    cookie.set_secure(state.config.environment == Environment::Prod);
    cookie.set_max_age(time::Duration::days(state.config.jwt.refresh_token_expiry_days));
    cookie
}

/// Expired replacement that instructs the browser to drop a cookie.
pub fn removal_cookie(name: String, path: &str) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_path(path.to_string());
    cookie.set_max_age(time::Duration::ZERO);
    cookie
}
