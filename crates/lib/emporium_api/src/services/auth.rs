//! Authentication service: registration, activation and the token lifecycle.
//!
//! Authenticate issues a pair and stores the refresh token; refresh rotates
//! it; logout revokes it. The registry only ever holds one live refresh
//! token per user.

use tracing::{error, info, warn};
use uuid::Uuid;

use emporium_core::auth::jwt::TokenPair;
use emporium_core::auth::password;
use emporium_core::mailer::welcome_email;
use emporium_core::models::{NewUser, User};
use emporium_core::store::StoreError;
use emporium_core::validation::{Validator, validate_registration};

use crate::AppState;
use crate::error::{AppError, AppResult, AuthFailure, ensure_valid};
use crate::models::RegisterRequest;

/// Hash on the blocking pool; bcrypt at production cost takes a while.
pub async fn hash_password(plaintext: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || password::hash_password(&plaintext, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hash task: {e}")))?
        .map_err(AppError::from)
}

async fn verify_password(plaintext: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || password::verify_password(&plaintext, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verify task: {e}")))?
        .map_err(AppError::from)
}

/// New 32-hex-char activation code.
fn activation_code() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Create an account with its cart and activation link, then send the
/// welcome mail in the background.
pub async fn register(state: &AppState, input: RegisterRequest) -> AppResult<User> {
    let mut v = Validator::new();
    validate_registration(&mut v, &input.name, &input.email, &input.password);
    ensure_valid(v)?;

    let password_hash = hash_password(input.password, state.config.password_cost).await?;
    let new_user = NewUser {
        username: input.username,
        email: input.email,
        phone_number: input.phone_number,
        password_hash,
        name: input.name,
        surname: input.surname,
        date_of_birth: input.date_of_birth,
        address: input.address,
        about_me: input.about_me,
    };

    let registration = match state.store.register_user(&new_user, &activation_code()).await {
        Ok(r) => r,
        Err(StoreError::DuplicateEmail) => {
            return Err(AppError::Conflict(
                "a user with this email address already exists".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    let user = registration.user;
    info!(user_id = user.id, "user registered");

    let mailer = state.mailer.clone();
    let email = welcome_email(&user.email, &user.name, &registration.activation.link);
    let user_id = user.id;
    state.tasks.spawn(async move {
        if let Err(e) = mailer.send(email).await {
            error!(user_id, error = %e, "welcome email could not be delivered");
        }
    });

    Ok(user)
}

pub async fn activate(state: &AppState, code: &str) -> AppResult<User> {
    match state.store.activate(code).await {
        Ok(user) => {
            info!(user_id = user.id, "account activated");
            Ok(user)
        }
        Err(StoreError::NotFound(_)) => Err(AppError::NotFound(
            "invalid or unknown activation code".into(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Check email + password and issue a fresh pair. Failures never touch the
/// registry.
pub async fn authenticate(
    state: &AppState,
    email: &str,
    plaintext: &str,
) -> AppResult<(TokenPair, User)> {
    let user = match state.store.user_by_email(email).await {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => {
            // Same bcrypt work as a wrong password.
            verify_password(plaintext.to_string(), state.decoy_hash.to_string()).await?;
            return Err(AppError::Unauthorized(AuthFailure::InvalidCredentials));
        }
        Err(e) => return Err(e.into()),
    };

    if !verify_password(plaintext.to_string(), user.password_hash.clone()).await? {
        warn!(user_id = user.id, "password mismatch");
        return Err(AppError::Unauthorized(AuthFailure::InvalidCredentials));
    }
    if !user.activated {
        return Err(AppError::Forbidden(
            "your user account must be activated to access this resource".into(),
        ));
    }

    let pair = state.tokens.issue_pair(user.id, &user.username)?;
    state.registry().save(user.id, &pair.refresh_token).await?;
    info!(user_id = user.id, "user authenticated");
    Ok((pair, user))
}

/// Exchange a live refresh token for a new pair. The registry swap is
/// conditional on the presented token, so it is accepted at most once.
pub async fn refresh(state: &AppState, refresh_token: &str) -> AppResult<(TokenPair, User)> {
    let claims = state.tokens.verify_refresh(refresh_token)?;

    let user = match state.store.user_by_id(claims.user_id).await {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => {
            return Err(AppError::Unauthorized(AuthFailure::UnknownUser));
        }
        Err(e) => return Err(e.into()),
    };

    let pair = state.tokens.issue_pair(user.id, &user.username)?;
    match state
        .registry()
        .rotate(user.id, refresh_token, &pair.refresh_token)
        .await
    {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            warn!(user_id = user.id, "refresh token is not live");
            return Err(AppError::Unauthorized(AuthFailure::InvalidToken));
        }
        Err(e) => return Err(e.into()),
    }
    info!(user_id = user.id, "refresh token rotated");
    Ok((pair, user))
}

pub async fn logout(state: &AppState, refresh_token: &str) -> AppResult<()> {
    match state.registry().revoke(refresh_token).await {
        Ok(()) => Ok(()),
        Err(StoreError::NotFound(_)) => {
            Err(AppError::NotFound("refresh token not found".into()))
        }
        Err(e) => Err(e.into()),
    }
}
