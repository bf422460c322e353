//! User account handlers.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::info;

use emporium_core::models::Role;
use emporium_core::store::StoreError;
use emporium_core::validation::{
    Validator, validate_email, validate_name, validate_password_plaintext,
};

use crate::AppState;
use crate::error::{AppError, AppResult, ensure_valid};
use crate::extract::{ApiJson, IdPath};
use crate::models::{RoleRequest, UpdateUserRequest};
use crate::services::auth::hash_password;

/// `GET /v1/users/{id}`
pub async fn show_user_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    let user = state.store.user_by_id(id).await?;
    Ok(Json(json!({ "user": user })))
}

/// `PATCH /v1/users/{id}`: partial profile update.
pub async fn update_user_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ApiJson(body): ApiJson<UpdateUserRequest>,
) -> AppResult<Json<Value>> {
    let mut user = state.store.user_by_id(id).await?;

    let mut v = Validator::new();
    if let Some(email) = &body.email {
        validate_email(&mut v, email);
    }
    if let Some(name) = &body.name {
        validate_name(&mut v, name);
    }
    if let Some(password) = &body.password {
        validate_password_plaintext(&mut v, password);
    }
    ensure_valid(v)?;

    if let Some(password) = body.password {
        user.password_hash = hash_password(password, state.config.password_cost).await?;
    }
    if let Some(username) = body.username {
        user.username = username;
    }
    if let Some(email) = body.email {
        user.email = email;
    }
    if let Some(name) = body.name {
        user.name = name;
    }
    if let Some(surname) = body.surname {
        user.surname = surname;
    }
    if let Some(phone_number) = body.phone_number {
        user.phone_number = phone_number;
    }
    if body.date_of_birth.is_some() {
        user.date_of_birth = body.date_of_birth;
    }
    if let Some(address) = body.address {
        user.address = address;
    }
    if let Some(about_me) = body.about_me {
        user.about_me = about_me;
    }
    if let Some(picture_url) = body.picture_url {
        user.picture_url = picture_url;
    }

    let user = match state.store.update_user(&user).await {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => {
            return Err(AppError::Conflict(
                "a user with this email address already exists".into(),
            ));
        }
        Err(StoreError::EditConflict) => {
            return Err(AppError::Conflict(
                "unable to update the record due to an edit conflict, please try again".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({ "user": user })))
}

/// `DELETE /v1/users/{id}`: admin only; cascades to the user's cart,
/// comments, tokens and activation link.
pub async fn delete_user_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    state.store.delete_user(id).await?;
    info!(user_id = id, "user deleted");
    Ok(Json(json!({ "message": "user successfully deleted" })))
}

/// Parse a role that may be stored on an account.
fn assignable_role(raw: &str) -> AppResult<Role> {
    match raw.parse::<Role>() {
        Ok(role) if role.is_assignable() => Ok(role),
        _ => Err(AppError::invalid("role", "must be either admin or user")),
    }
}

/// `PUT /v1/users/{id}/role`: admin only.
pub async fn update_role_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ApiJson(body): ApiJson<RoleRequest>,
) -> AppResult<Json<Value>> {
    let role = assignable_role(&body.role)?;
    let mut user = state.store.user_by_id(id).await?;
    user.role = role;
    let user = state.store.update_user(&user).await?;
    info!(user_id = id, role = %role, "role changed");
    Ok(Json(json!({ "user": user })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stored_roles_are_assignable() {
        assert_eq!(assignable_role("admin").unwrap(), Role::Admin);
        assert_eq!(assignable_role("user").unwrap(), Role::User);
        assert!(matches!(assignable_role("owner"), Err(AppError::Validation(_))));
        assert!(matches!(assignable_role("root"), Err(AppError::Validation(_))));
    }
}
