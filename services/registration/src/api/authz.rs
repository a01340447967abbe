//! Authorization helpers.
//!
//! Every route under `/api/user` needs an activated account; `/api/admin`
//! additionally needs the admin role.

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::UserWithSpot;
use crate::state::AppState;

fn unauthorized(request_id: &str) -> ApiError {
    ApiError::unauthorized("unauthorized", "Missing or invalid session token")
        .with_request_id(request_id.to_string())
}

/// Resolves the session token to an activated user.
pub async fn require_user(state: &AppState, ctx: &RequestContext) -> Result<UserWithSpot, ApiError> {
    let request_id = &ctx.request_id;
    let Some(token) = ctx.token.as_deref() else {
        return Err(unauthorized(request_id));
    };

    let claims = state.credentials().verify_token(token).map_err(|e| {
        tracing::debug!(error = %e, request_id = %request_id, "Rejected session token");
        unauthorized(request_id)
    })?;

    let user = state
        .store()
        .find_user_by_username(&claims.username)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "load session user"))?
        .ok_or_else(|| unauthorized(request_id))?;

    if !user.user.is_activated {
        return Err(
            ApiError::forbidden("not_activated", "Account has not been activated")
                .with_request_id(request_id.clone()),
        );
    }
    Ok(user)
}

pub async fn require_admin(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<UserWithSpot, ApiError> {
    let user = require_user(state, ctx).await?;
    if !user.user.is_admin() {
        return Err(
            ApiError::forbidden("forbidden", "Admin role required")
                .with_request_id(ctx.request_id.clone()),
        );
    }
    Ok(user)
}
