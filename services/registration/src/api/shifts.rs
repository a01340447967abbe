//! Shift routes: listing, admin management, CSV import and enrollment.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use festreg_id::{ShiftId, UserId};
use serde::{Deserialize, Serialize};

use crate::api::authz;
use crate::api::error::ApiError;
use crate::api::parse_path_id;
use crate::api::request_context::RequestContext;
use crate::import::{import_shifts, ImportOutcome, DEFAULT_POINTS};
use crate::model::{ShiftDay, ShiftWithRoster};
use crate::state::AppState;
use crate::store::NewShift;

/// Mounted under `/api/user`.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/shifts", get(list_shifts_for_user))
        .route("/shifts/{shift_id}/me", post(enroll_me).delete(withdraw_me))
}

/// Mounted under `/api/admin/shifts`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_shifts).post(create_shift))
        .route("/import", post(import_csv))
        .route("/{shift_id}", put(update_shift).delete(delete_shift))
        .route(
            "/{shift_id}/user/{user_id}",
            post(enroll_user).delete(withdraw_user),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftResponse {
    pub id: ShiftId,
    pub name: String,
    pub head_count: i32,
    pub points: i32,
    pub description: Option<String>,
    pub day: Option<ShiftDay>,
    pub start_time: Option<DateTime<Utc>>,
    pub current_count: i64,
    pub user_names: Vec<String>,
}

impl From<&ShiftWithRoster> for ShiftResponse {
    fn from(entry: &ShiftWithRoster) -> Self {
        let shift = &entry.shift;
        Self {
            id: shift.id,
            name: shift.name.clone(),
            head_count: shift.head_count,
            points: shift.points,
            description: shift.description.clone(),
            day: shift.day,
            start_time: shift.start_time,
            current_count: entry.current_count(),
            user_names: entry.user_names(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShiftRequest {
    pub name: String,
    pub head_count: i32,
    pub points: Option<i32>,
    pub description: Option<String>,
    pub day: Option<ShiftDay>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShiftRequest {
    pub name: Option<String>,
    pub head_count: Option<i32>,
    pub points: Option<i32>,
    pub description: Option<String>,
    pub day: Option<ShiftDay>,
    pub start_time: Option<DateTime<Utc>>,
}

fn validate(name: &str, head_count: i32, request_id: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_name", "Name cannot be empty")
            .with_request_id(request_id.to_string()));
    }
    if head_count <= 0 {
        return Err(
            ApiError::bad_request("invalid_head_count", "headCount must be positive")
                .with_request_id(request_id.to_string()),
        );
    }
    Ok(())
}

async fn load_shift(
    state: &AppState,
    shift_id: ShiftId,
    request_id: &str,
) -> Result<ShiftWithRoster, ApiError> {
    state
        .store()
        .get_shift(shift_id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "load shift"))?
        .ok_or_else(|| {
            ApiError::not_found("shift_not_found", format!("Shift {shift_id} not found"))
                .with_request_id(request_id.to_string())
        })
}

async fn shift_list(state: &AppState, request_id: &str) -> Result<Json<Vec<ShiftResponse>>, ApiError> {
    let shifts = state
        .store()
        .list_shifts()
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "list shifts"))?;
    Ok(Json(shifts.iter().map(ShiftResponse::from).collect()))
}

// =============================================================================
// User handlers
// =============================================================================

async fn list_shifts_for_user(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<ShiftResponse>>, ApiError> {
    authz::require_user(&state, &ctx).await?;
    shift_list(&state, &ctx.request_id).await
}

async fn enroll_me(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(shift_id): Path<String>,
) -> Result<Json<ShiftResponse>, ApiError> {
    let user = authz::require_user(&state, &ctx).await?;
    let shift_id: ShiftId = parse_path_id(&shift_id, "shift", &ctx.request_id)?;
    enroll(&state, shift_id, user.user.id, &ctx.request_id).await
}

async fn withdraw_me(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(shift_id): Path<String>,
) -> Result<Json<ShiftResponse>, ApiError> {
    let user = authz::require_user(&state, &ctx).await?;
    let shift_id: ShiftId = parse_path_id(&shift_id, "shift", &ctx.request_id)?;
    withdraw(&state, shift_id, user.user.id, &ctx.request_id).await
}

async fn enroll(
    state: &AppState,
    shift_id: ShiftId,
    user_id: UserId,
    request_id: &str,
) -> Result<Json<ShiftResponse>, ApiError> {
    state
        .allocation()
        .enroll(shift_id, user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;
    let shift = load_shift(state, shift_id, request_id).await?;
    Ok(Json(ShiftResponse::from(&shift)))
}

async fn withdraw(
    state: &AppState,
    shift_id: ShiftId,
    user_id: UserId,
    request_id: &str,
) -> Result<Json<ShiftResponse>, ApiError> {
    state
        .allocation()
        .withdraw(shift_id, user_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;
    let shift = load_shift(state, shift_id, request_id).await?;
    Ok(Json(ShiftResponse::from(&shift)))
}

// =============================================================================
// Admin handlers
// =============================================================================

async fn list_shifts(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<ShiftResponse>>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    shift_list(&state, &ctx.request_id).await
}

async fn create_shift(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateShiftRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    validate(&req.name, req.head_count, request_id)?;

    let shift = state
        .store()
        .insert_shift(NewShift {
            name: req.name.trim().to_string(),
            head_count: req.head_count,
            points: req.points.unwrap_or(DEFAULT_POINTS),
            description: req.description,
            day: req.day,
            start_time: req.start_time,
        })
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "create shift"))?;

    tracing::info!(shift_id = %shift.id, request_id = %request_id, head_count = shift.head_count, "Shift created");
    let created = ShiftWithRoster::new(shift, Vec::new());
    Ok((StatusCode::CREATED, Json(ShiftResponse::from(&created))))
}

async fn update_shift(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(shift_id): Path<String>,
    Json(req): Json<UpdateShiftRequest>,
) -> Result<Json<ShiftResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    let shift_id: ShiftId = parse_path_id(&shift_id, "shift", request_id)?;

    let mut shift = load_shift(&state, shift_id, request_id).await?.shift;
    if let Some(name) = req.name {
        shift.name = name.trim().to_string();
    }
    if let Some(head_count) = req.head_count {
        shift.head_count = head_count;
    }
    if let Some(points) = req.points {
        shift.points = points;
    }
    if let Some(description) = req.description {
        shift.description = Some(description);
    }
    if let Some(day) = req.day {
        shift.day = Some(day);
    }
    if let Some(start_time) = req.start_time {
        shift.start_time = Some(start_time);
    }
    validate(&shift.name, shift.head_count, request_id)?;

    state
        .store()
        .save_shift(&shift)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "update shift"))?;

    let shift = load_shift(&state, shift_id, request_id).await?;
    Ok(Json(ShiftResponse::from(&shift)))
}

async fn delete_shift(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(shift_id): Path<String>,
) -> Result<Json<ShiftResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    let shift_id: ShiftId = parse_path_id(&shift_id, "shift", request_id)?;

    let shift = load_shift(&state, shift_id, request_id).await?;
    let deleted = state
        .store()
        .delete_shift(shift_id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "delete shift"))?;
    if !deleted {
        return Err(
            ApiError::not_found("shift_not_found", format!("Shift {shift_id} not found"))
                .with_request_id(request_id.to_string()),
        );
    }

    tracing::info!(shift_id = %shift_id, request_id = %request_id, "Shift deleted");
    Ok(Json(ShiftResponse::from(&shift)))
}

/// `POST /api/admin/shifts/import` with the CSV in the multipart field `file`.
///
/// Responds 201 when every row was imported and 207 when some were skipped.
async fn import_csv(
    State(state): State<AppState>,
    ctx: RequestContext,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();

    let bad_upload = |e: axum::extract::multipart::MultipartError| {
        ApiError::bad_request("invalid_upload", e.body_text())
            .with_request_id(request_id.to_string())
    };

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        if field.name() == Some("file") {
            file = Some(field.bytes().await.map_err(bad_upload)?);
            break;
        }
    }
    let Some(file) = file else {
        return Err(
            ApiError::bad_request("missing_file", "Multipart field 'file' is required")
                .with_request_id(request_id.to_string()),
        );
    };

    let report = import_shifts(state.store(), &file)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    let status = match report.outcome {
        ImportOutcome::Complete => StatusCode::CREATED,
        ImportOutcome::Partial => StatusCode::MULTI_STATUS,
    };
    tracing::info!(
        request_id = %request_id,
        imported = report.imported,
        failed = report.failed,
        "Shift CSV imported"
    );
    Ok((status, Json(report)))
}

async fn enroll_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((shift_id, user_id)): Path<(String, String)>,
) -> Result<Json<ShiftResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let shift_id: ShiftId = parse_path_id(&shift_id, "shift", &ctx.request_id)?;
    let user_id: UserId = parse_path_id(&user_id, "user", &ctx.request_id)?;
    enroll(&state, shift_id, user_id, &ctx.request_id).await
}

async fn withdraw_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((shift_id, user_id)): Path<(String, String)>,
) -> Result<Json<ShiftResponse>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let shift_id: ShiftId = parse_path_id(&shift_id, "shift", &ctx.request_id)?;
    let user_id: UserId = parse_path_id(&user_id, "user", &ctx.request_id)?;
    withdraw(&state, shift_id, user_id, &ctx.request_id).await
}
