//! Refresh-token cookie.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use emporium_core::auth::jwt::REFRESH_TOKEN_EXPIRY_SECS;

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refreshToken";

/// httpOnly cookie mirroring the refresh token for its whole lifetime.
pub fn refresh_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS))
        .build()
}

/// Expired cookie that makes the browser drop the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(-1))
        .build()
}

pub fn refresh_token_from(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_cookie_lasts_thirty_days() {
        let cookie = refresh_cookie("tok", false);
        assert_eq!(cookie.name(), "refreshToken");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::days(30)));
    }

    #[test]
    fn clearing_uses_negative_max_age() {
        let cookie = clear_refresh_cookie(true);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.secure(), Some(true));
        assert!(cookie.max_age().unwrap().is_negative());
    }

    #[test]
    fn empty_cookie_is_ignored() {
        let jar = CookieJar::new().add(Cookie::new(REFRESH_COOKIE, ""));
        assert_eq!(refresh_token_from(&jar), None);
        let jar = CookieJar::new().add(Cookie::new(REFRESH_COOKIE, "abc"));
        assert_eq!(refresh_token_from(&jar).as_deref(), Some("abc"));
    }
}
