//! Public account routes: registration, email verification, login and
//! password reset.

use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::error::ApiError;
use crate::api::request_context::{RequestContext, SESSION_COOKIE};
use crate::api::users::{load_user, respond, PasswordChange};
use crate::auth::tokens::{generate_verification_token, hash_token};
use crate::auth::{check_new_password, CredentialError};
use crate::mail::{password_reset_mail, send_with_deadline, verification_mail};
use crate::model::{Role, User};
use crate::state::AppState;
use crate::store::NewUser;

const SESSION_COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify", get(verify))
        .route("/requestPasswordReset", post(request_password_reset))
        .route("/resetPassword", post(reset_password))
}

/// Builds the `Set-Cookie` value for the session cookie. An empty token with
/// `max_age` 0 clears it.
pub(crate) fn session_cookie(
    token: &str,
    max_age: i64,
    secure: bool,
    request_id: &str,
) -> Result<HeaderValue, ApiError> {
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; Path=/api; Max-Age={max_age}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, "Invalid session cookie value");
        ApiError::internal("internal_error", "Failed to build session cookie")
            .with_request_id(request_id.to_string())
    })
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub nickname: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub site_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(flatten)]
    pub password: PasswordChange,
}

// =============================================================================
// Handlers
// =============================================================================

async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.as_str();
    let settings = state.settings();

    if req.site_password != settings.site_password {
        return Err(
            ApiError::bad_request("invalid_site_password", "Wrong site password")
                .with_request_id(request_id.to_string()),
        );
    }

    let username = req.username.trim().to_lowercase();
    if username.is_empty() || username.len() > 320 || !username.contains('@') {
        return Err(
            ApiError::bad_request("invalid_email", "Invalid email format")
                .with_request_id(request_id.to_string()),
        );
    }
    let nickname = req.nickname.trim().to_string();
    if nickname.is_empty() {
        return Err(
            ApiError::bad_request("invalid_nickname", "Nickname cannot be empty")
                .with_request_id(request_id.to_string()),
        );
    }
    check_new_password(&req.password, &req.password)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    let password_hash = state
        .credentials()
        .hash_password(&req.password)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;
    let issued = generate_verification_token();

    let existing = state
        .store()
        .find_user_by_username(&username)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "look up user"))?;

    let user: User = match existing {
        Some(entry) if entry.user.is_activated => {
            return Err(
                ApiError::bad_request("username_taken", "User already exists")
                    .with_request_id(request_id.to_string()),
            );
        }
        // Placeholder created by an admin: claim it.
        Some(entry) => {
            let mut user = entry.user;
            user.nickname = nickname;
            user.full_name = req.full_name;
            user.phone = req.phone;
            user.password_hash = Some(password_hash);
            user.verification_token_hash = Some(issued.hash.clone());
            user.token_expires_at = Some(issued.expires_at);
            state
                .store()
                .save_user(&user)
                .await
                .map_err(|e| ApiError::from_store(e, request_id, "register user"))?;
            user
        }
        None => state
            .store()
            .insert_user(NewUser {
                username: Some(username.clone()),
                password_hash: Some(password_hash),
                role: Role::Reg,
                nickname,
                full_name: req.full_name,
                phone: req.phone,
                is_activated: false,
                verification_token_hash: Some(issued.hash.clone()),
                token_expires_at: Some(issued.expires_at),
            })
            .await
            .map_err(|e| ApiError::from_store(e, request_id, "register user"))?,
    };

    let link = format!(
        "{}/api/verify?token={}",
        settings.api_base_url.trim_end_matches('/'),
        issued.token
    );
    let mail = verification_mail(&username, &user.nickname, &link);
    send_with_deadline(state.mailer(), &mail).await.map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, user_id = %user.id, "Failed to send verification mail");
        ApiError::internal("mail_failed", "Failed to send verification email")
            .with_request_id(request_id.to_string())
    })?;

    tracing::info!(user_id = %user.id, request_id = %request_id, "User registered");
    let entry = load_user(&state, user.id, request_id).await?;
    Ok((StatusCode::CREATED, respond(&state, &entry)))
}

async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.as_str();
    let username = req.username.trim().to_lowercase();

    let invalid = || {
        ApiError::from(CredentialError::InvalidCredentials).with_request_id(request_id.to_string())
    };

    let mut user = state
        .store()
        .find_user_by_username(&username)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "look up user"))?
        .ok_or_else(invalid)?
        .user;

    state
        .credentials()
        .verify_password(&req.password, user.password_hash.as_deref())
        .map_err(|_| invalid())?;

    if !user.is_activated {
        return Err(
            ApiError::forbidden("not_activated", "Please verify your email first")
                .with_request_id(request_id.to_string()),
        );
    }

    let token = state
        .credentials()
        .issue_token(&username)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    user.last_login = Some(Utc::now());
    state
        .store()
        .save_user(&user)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "record login"))?;

    let cookie = session_cookie(
        &token,
        SESSION_COOKIE_MAX_AGE_SECS,
        state.settings().production,
        request_id,
    )?;

    tracing::info!(user_id = %user.id, request_id = %request_id, "User logged in");
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginResponse {
            status: "success",
            token,
        }),
    ))
}

async fn verify(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<TokenQuery>,
) -> Result<Redirect, ApiError> {
    let request_id = ctx.request_id.as_str();
    let token = query.token.unwrap_or_default();
    if token.trim().is_empty() {
        return Err(
            ApiError::bad_request("missing_token", "Verification token is required")
                .with_request_id(request_id.to_string()),
        );
    }

    let mut user = find_by_token(&state, &token, request_id).await?;

    user.is_activated = true;
    user.verification_token_hash = None;
    user.token_expires_at = None;
    state
        .store()
        .save_user(&user)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "activate user"))?;

    tracing::info!(user_id = %user.id, request_id = %request_id, "User verified");
    let target = format!(
        "{}/home?verify=success",
        state.settings().frontend_base_url.trim_end_matches('/')
    );
    Ok(Redirect::temporary(&target))
}

async fn request_password_reset(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<UsernameQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.as_str();
    let username = query.username.unwrap_or_default().trim().to_lowercase();
    if username.is_empty() {
        return Err(
            ApiError::bad_request("missing_username", "Username is required")
                .with_request_id(request_id.to_string()),
        );
    }

    let mut user = state
        .store()
        .find_user_by_username(&username)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "look up user"))?
        .ok_or_else(|| {
            ApiError::bad_request("unknown_user", "User not found")
                .with_request_id(request_id.to_string())
        })?
        .user;

    let issued = generate_verification_token();
    user.verification_token_hash = Some(issued.hash);
    user.token_expires_at = Some(issued.expires_at);
    state
        .store()
        .save_user(&user)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "store reset token"))?;

    let link = format!(
        "{}/home?resetToken={}",
        state.settings().frontend_base_url.trim_end_matches('/'),
        issued.token
    );
    let mail = password_reset_mail(&username, &user.nickname, &link);
    send_with_deadline(state.mailer(), &mail).await.map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, user_id = %user.id, "Failed to send reset mail");
        ApiError::internal("mail_failed", "Failed to send password reset email")
            .with_request_id(request_id.to_string())
    })?;

    tracing::info!(user_id = %user.id, request_id = %request_id, "Password reset requested");
    Ok(Json(json!({ "status": "success" })))
}

async fn reset_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.as_str();

    let mut user = find_by_token(&state, &req.token, request_id).await?;

    check_new_password(&req.password.password, &req.password.password_confirm)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    user.password_hash = Some(
        state
            .credentials()
            .hash_password(&req.password.password)
            .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?,
    );
    user.verification_token_hash = None;
    user.token_expires_at = None;
    state
        .store()
        .save_user(&user)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "reset password"))?;

    tracing::info!(user_id = %user.id, request_id = %request_id, "Password reset");
    Ok(Json(json!({ "status": "success" })))
}

/// Looks up the owner of a one-time token, rejecting expired ones.
async fn find_by_token(state: &AppState, token: &str, request_id: &str) -> Result<User, ApiError> {
    let user = state
        .store()
        .find_user_by_token_hash(&hash_token(token.trim()))
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "look up token"))?
        .ok_or_else(|| {
            ApiError::not_found("invalid_token", "Token not found")
                .with_request_id(request_id.to_string())
        })?;

    if user.token_expires_at.is_some_and(|expiry| expiry < Utc::now()) {
        return Err(
            ApiError::bad_request("token_expired", "Token has expired")
                .with_request_id(request_id.to_string()),
        );
    }
    Ok(user)
}
