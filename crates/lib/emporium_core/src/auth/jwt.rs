//! Access/refresh token issuance and verification.
//!
//! Both tokens are HS512 JWTs signed with separate secrets, so neither kind
//! verifies under the other's key.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use uuid::Uuid;

use super::AuthError;

/// Access token lifetime: 4 hours.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 4 * 60 * 60;

/// Refresh token lifetime: 30 days.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 30 * 24 * 60 * 60;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Signing secrets for the two token kinds.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: i64,
    pub username: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Unique token id; makes every issued token distinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Mints and verifies token pairs. Holds keys only; never reads the environment.
#[derive(Clone)]
pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
}

impl TokenIssuer {
    /// Build an issuer. Both secrets must be non-empty and distinct.
    pub fn new(config: &JwtConfig) -> Result<Self, AuthError> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(AuthError::SigningError("signing secret is empty".into()));
        }
        if config.access_secret == config.refresh_secret {
            return Err(AuthError::SigningError(
                "access and refresh secrets must differ".into(),
            ));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;

        Ok(Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            validation,
        })
    }

    /// Issue an access/refresh pair for a user.
    pub fn issue_pair(&self, user_id: i64, username: &str) -> Result<TokenPair, AuthError> {
        self.issue_pair_at(user_id, username, Utc::now())
    }

    /// Issue a pair as if the current time were `now`.
    pub fn issue_pair_at(
        &self,
        user_id: i64,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AuthError> {
        let refresh = RefreshClaims {
            user_id,
            username: Some(username.to_string()),
            exp: (now + Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS)).timestamp(),
            jti: Some(Uuid::new_v4().simple().to_string()),
        };
        let access = AccessClaims {
            user_id,
            username: username.to_string(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS)).timestamp(),
            jti: Some(Uuid::new_v4().simple().to_string()),
        };

        Ok(TokenPair {
            refresh_token: sign(&refresh, &self.refresh_encoding)?,
            access_token: sign(&access, &self.access_encoding)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        verify(token, &self.access_decoding, &self.validation)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        verify(token, &self.refresh_decoding, &self.validation)
    }
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String, AuthError> {
    encode(&Header::new(ALGORITHM), claims, key)
        .map_err(|e| AuthError::SigningError(format!("jwt encode: {e}")))
}

fn verify<T: DeserializeOwned>(
    token: &str,
    key: &DecodingKey,
    validation: &Validation,
) -> Result<T, AuthError> {
    decode::<T>(token, key, validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken(e.to_string()),
        })
}

/// Convert a JSON number to a user id. Floats are accepted only when finite,
/// integral and inside the `i64` range.
pub fn user_id_from_number(n: &Number) -> Option<i64> {
    if let Some(id) = n.as_i64() {
        return Some(id);
    }
    let f = n.as_f64()?;
    if !f.is_finite() || f.fract() != 0.0 || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return None;
    }
    Some(f as i64)
}

fn deserialize_user_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let n = Number::deserialize(deserializer)?;
    user_id_from_number(&n)
        .ok_or_else(|| de::Error::custom(format!("user_id is not an exact integer: {n}")))
}
