//! Self-service routes for the logged-in user (`/api/user`).

use axum::{
    extract::State,
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::api::auth::session_cookie;
use crate::api::authz;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::api::users::{
    apply_update, change_password, respond, PasswordChange, UserResponse, UserUpdate,
};
use crate::api::{shifts, spots};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_me).put(update_me))
        .route("/me/pw", put(update_my_password))
        .merge(spots::user_routes())
        .merge(shifts::user_routes())
}

async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let user = authz::require_user(&state, &ctx).await?;
    let cookie = session_cookie("", 0, state.settings().production, &ctx.request_id)?;

    tracing::info!(user_id = %user.user.id, request_id = %ctx.request_id, "User logged out");
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(json!({ "status": "success" })),
    ))
}

async fn get_me(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<UserResponse>, ApiError> {
    let user = authz::require_user(&state, &ctx).await?;
    Ok(respond(&state, &user))
}

async fn update_me(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = authz::require_user(&state, &ctx).await?;
    let updated = apply_update(
        &state,
        user,
        update.without_admin_fields(),
        &ctx.request_id,
    )
    .await?;
    Ok(respond(&state, &updated))
}

async fn update_my_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(change): Json<PasswordChange>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = authz::require_user(&state, &ctx).await?;
    let updated = change_password(&state, user, change, &ctx.request_id).await?;
    Ok(respond(&state, &updated))
}
