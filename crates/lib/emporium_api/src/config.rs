//! API server configuration.

use emporium_core::auth::jwt::JwtConfig;
use emporium_core::auth::password::DEFAULT_COST;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:4000").
    pub bind_addr: String,
    /// Environment name reported by the health check (development|staging|production).
    pub environment: String,
    /// Token signing secrets.
    pub jwt: JwtConfig,
    /// bcrypt cost for new password hashes.
    pub password_cost: u32,
    /// Mark auth cookies `Secure`.
    pub cookie_secure: bool,
}

impl ApiConfig {
    pub fn new(bind_addr: impl Into<String>, jwt: JwtConfig) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            environment: "development".into(),
            jwt,
            password_cost: DEFAULT_COST,
            cookie_secure: false,
        }
    }
}
