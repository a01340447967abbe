//! User representations and admin user management.
//!
//! `/api/admin/users` lets admins list, create, edit, re-password and delete
//! accounts. The update path is shared with `PUT /api/user/me`, which strips
//! the admin-only fields first.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use festreg_id::{SpotTypeId, UserId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::allocation::SpotChange;
use crate::api::authz;
use crate::api::error::ApiError;
use crate::api::parse_path_id;
use crate::api::request_context::RequestContext;
use crate::auth::check_new_password;
use crate::balance::{amount_to_pay, SolidarityConfig};
use crate::model::{Role, SpotType, UserWithSpot};
use crate::state::AppState;
use crate::store::NewUser;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{user_id}", put(update_user).delete(delete_user))
        .route("/{user_id}/pw", put(update_user_password))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: UserId,
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub role: Role,
    pub nickname: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub soli_amount: i64,
    pub takes_soli: bool,
    pub amount_paid: i64,
    pub amount_to_pay: i64,
    pub is_activated: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub spot_type_id: Option<SpotTypeId>,
    pub spot_type: Option<SpotType>,
    pub created_at: DateTime<Utc>,
}

impl UserResponse {
    pub fn new(entry: &UserWithSpot, solidarity: SolidarityConfig) -> Self {
        let user = &entry.user;
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            nickname: user.nickname.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            soli_amount: user.soli_amount,
            takes_soli: user.takes_soli,
            amount_paid: user.amount_paid,
            amount_to_pay: amount_to_pay(entry, solidarity),
            is_activated: user.is_activated,
            last_login: user.last_login,
            spot_type_id: user.spot_type_id,
            spot_type: entry.spot_type.clone(),
            created_at: user.created_at,
        }
    }
}

/// Partial user update. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub role: Option<Role>,
    pub nickname: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub soli_amount: Option<i64>,
    pub takes_soli: Option<bool>,
    pub amount_paid: Option<i64>,
    #[serde(default, deserialize_with = "spot_change")]
    pub spot_type_id: SpotChange,
}

impl UserUpdate {
    /// Drops the fields a user may not change on their own account.
    pub fn without_admin_fields(self) -> Self {
        Self {
            username: None,
            role: None,
            amount_paid: None,
            ..self
        }
    }
}

/// `null` and `0` clear the spot type, an id string selects one.
fn spot_change<'de, D>(deserializer: D) -> Result<SpotChange, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Id(SpotTypeId),
        Number(i64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::Number(0)) => Ok(SpotChange::Clear),
        Some(Raw::Id(id)) => Ok(SpotChange::Set(id)),
        Some(Raw::Number(n)) => Err(D::Error::custom(format!("invalid spotTypeId {n}"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: Option<String>,
    pub nickname: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub spot_type_id: Option<SpotTypeId>,
}

// =============================================================================
// Shared update path
// =============================================================================

pub(crate) async fn load_user(
    state: &AppState,
    user_id: UserId,
    request_id: &str,
) -> Result<UserWithSpot, ApiError> {
    state
        .store()
        .get_user(user_id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "load user"))?
        .ok_or_else(|| {
            ApiError::not_found("user_not_found", format!("User {user_id} not found"))
                .with_request_id(request_id.to_string())
        })
}

pub(crate) fn respond(state: &AppState, entry: &UserWithSpot) -> Json<UserResponse> {
    Json(UserResponse::new(entry, state.settings().solidarity))
}

fn non_empty(value: String, field: &str, request_id: &str) -> Result<String, ApiError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(
            ApiError::bad_request(format!("invalid_{field}"), format!("{field} cannot be empty"))
                .with_request_id(request_id.to_string()),
        );
    }
    Ok(value)
}

/// Applies `update` to `target`, routing any spot change through allocation.
pub(crate) async fn apply_update(
    state: &AppState,
    target: UserWithSpot,
    update: UserUpdate,
    request_id: &str,
) -> Result<UserWithSpot, ApiError> {
    let original = target.user;
    let mut user = original.clone();

    if let Some(username) = update.username {
        user.username = Some(non_empty(username, "username", request_id)?.to_lowercase());
    }
    if let Some(nickname) = update.nickname {
        user.nickname = non_empty(nickname, "nickname", request_id)?;
    }
    if let Some(role) = update.role {
        user.role = role;
    }
    if let Some(full_name) = update.full_name {
        user.full_name = Some(full_name);
    }
    if let Some(phone) = update.phone {
        user.phone = Some(phone);
    }
    if let Some(soli_amount) = update.soli_amount {
        user.soli_amount = soli_amount;
    }
    if let Some(takes_soli) = update.takes_soli {
        user.takes_soli = takes_soli;
    }
    if let Some(amount_paid) = update.amount_paid {
        user.amount_paid = amount_paid;
    }

    if user.soli_amount < 0 || user.amount_paid < 0 {
        return Err(ApiError::bad_request(
            "invalid_amount",
            "soliAmount and amountPaid cannot be negative",
        )
        .with_request_id(request_id.to_string()));
    }
    if user.soli_amount > 0 && user.takes_soli {
        return Err(ApiError::bad_request(
            "soli_conflict",
            "Cannot both give and take solidarity",
        )
        .with_request_id(request_id.to_string()));
    }

    // The pool is only touched once the plain fields are stored; save_user
    // never writes spot_type_id.
    state
        .store()
        .save_user(&user)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "save user"))?;

    if let Err(e) = state
        .allocation()
        .apply_spot_change(&user, update.spot_type_id)
        .await
    {
        if let Err(restore) = state.store().save_user(&original).await {
            tracing::error!(
                error = %restore,
                request_id = %request_id,
                user_id = %user.id,
                "Failed to restore user after rejected spot change"
            );
        }
        return Err(ApiError::from(e).with_request_id(request_id.to_string()));
    }

    load_user(state, user.id, request_id).await
}

pub(crate) async fn change_password(
    state: &AppState,
    target: UserWithSpot,
    change: PasswordChange,
    request_id: &str,
) -> Result<UserWithSpot, ApiError> {
    check_new_password(&change.password, &change.password_confirm)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    let mut user = target.user;
    user.password_hash = Some(
        state
            .credentials()
            .hash_password(&change.password)
            .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?,
    );
    state
        .store()
        .save_user(&user)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "save password"))?;

    tracing::info!(user_id = %user.id, request_id = %request_id, "Password changed");
    Ok(UserWithSpot {
        user,
        spot_type: target.spot_type,
    })
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    authz::require_admin(&state, &ctx).await?;

    let users = state
        .store()
        .list_users()
        .await
        .map_err(|e| ApiError::from_store(e, &ctx.request_id, "list users"))?;

    let solidarity = state.settings().solidarity;
    Ok(Json(
        users
            .iter()
            .map(|entry| UserResponse::new(entry, solidarity))
            .collect(),
    ))
}

async fn create_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();

    let nickname = non_empty(req.nickname, "nickname", request_id)?;
    let username = req
        .username
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());

    let user = state
        .store()
        .insert_user(NewUser {
            username,
            password_hash: None,
            role: Role::Reg,
            nickname,
            full_name: req.full_name,
            phone: req.phone,
            is_activated: false,
            verification_token_hash: None,
            token_expires_at: None,
        })
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "create user"))?;

    if let Some(spot) = req.spot_type_id {
        if let Err(e) = state.allocation().assign_spot(spot, user.id).await {
            // Do not leave a half-created account behind.
            if let Err(cleanup) = state.store().delete_user(user.id).await {
                tracing::error!(
                    error = %cleanup,
                    request_id = %request_id,
                    user_id = %user.id,
                    "Failed to remove user after rejected spot assignment"
                );
            }
            return Err(ApiError::from(e).with_request_id(request_id.to_string()));
        }
    }

    tracing::info!(user_id = %user.id, request_id = %request_id, "User created by admin");
    let entry = load_user(&state, user.id, request_id).await?;
    Ok((StatusCode::CREATED, respond(&state, &entry)))
}

async fn update_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let user_id: UserId = parse_path_id(&user_id, "user", &ctx.request_id)?;

    let target = load_user(&state, user_id, &ctx.request_id).await?;
    let updated = apply_update(&state, target, update, &ctx.request_id).await?;
    Ok(respond(&state, &updated))
}

async fn update_user_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
    Json(change): Json<PasswordChange>,
) -> Result<Json<UserResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let user_id: UserId = parse_path_id(&user_id, "user", &ctx.request_id)?;

    let target = load_user(&state, user_id, &ctx.request_id).await?;
    let updated = change_password(&state, target, change, &ctx.request_id).await?;
    Ok(respond(&state, &updated))
}

async fn delete_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    let user_id: UserId = parse_path_id(&user_id, "user", request_id)?;

    let target = load_user(&state, user_id, request_id).await?;
    if target.user.username.as_deref() == Some(state.settings().super_admin.as_str()) {
        return Err(ApiError::bad_request(
            "protected_user",
            "The super admin cannot be deleted",
        )
        .with_request_id(request_id.to_string()));
    }

    let deleted = state
        .store()
        .delete_user(user_id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "delete user"))?;
    if !deleted {
        return Err(
            ApiError::not_found("user_not_found", format!("User {user_id} not found"))
                .with_request_id(request_id.to_string()),
        );
    }

    tracing::info!(user_id = %user_id, request_id = %request_id, "User deleted");
    Ok(respond(&state, &target))
}
