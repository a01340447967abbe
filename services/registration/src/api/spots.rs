//! Spot type routes.
//!
//! Users see the list with live `currentCount`; admins manage the pools.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use festreg_id::SpotTypeId;
use serde::Deserialize;

use crate::api::authz;
use crate::api::error::ApiError;
use crate::api::parse_path_id;
use crate::api::request_context::RequestContext;
use crate::model::SpotTypeWithCount;
use crate::state::AppState;
use crate::store::NewSpotType;

/// Mounted under `/api/user`.
pub fn user_routes() -> Router<AppState> {
    Router::new().route("/spots", get(list_spots_for_user))
}

/// Mounted under `/api/admin/spots`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_spots).post(create_spot))
        .route("/{spot_id}", put(update_spot).delete(delete_spot))
}

#[derive(Debug, Deserialize)]
pub struct CreateSpotRequest {
    pub name: String,
    pub price: i64,
    pub limit: i64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSpotRequest {
    pub name: Option<String>,
    pub price: Option<i64>,
    pub limit: Option<i64>,
    pub description: Option<String>,
}

fn validate(name: &str, price: i64, limit: i64, request_id: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_name", "Name cannot be empty")
            .with_request_id(request_id.to_string()));
    }
    if price < 0 || limit < 0 {
        return Err(
            ApiError::bad_request("invalid_spot", "price and limit cannot be negative")
                .with_request_id(request_id.to_string()),
        );
    }
    Ok(())
}

async fn load_spot(
    state: &AppState,
    spot_id: SpotTypeId,
    request_id: &str,
) -> Result<SpotTypeWithCount, ApiError> {
    state
        .store()
        .get_spot_type(spot_id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "load spot type"))?
        .ok_or_else(|| {
            ApiError::not_found("spot_not_found", format!("Spot type {spot_id} not found"))
                .with_request_id(request_id.to_string())
        })
}

async fn spot_list(
    state: &AppState,
    request_id: &str,
) -> Result<Json<Vec<SpotTypeWithCount>>, ApiError> {
    state
        .store()
        .list_spot_types()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_store(e, request_id, "list spot types"))
}

async fn list_spots_for_user(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<SpotTypeWithCount>>, ApiError> {
    authz::require_user(&state, &ctx).await?;
    spot_list(&state, &ctx.request_id).await
}

async fn list_spots(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<SpotTypeWithCount>>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    spot_list(&state, &ctx.request_id).await
}

async fn create_spot(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateSpotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    validate(&req.name, req.price, req.limit, request_id)?;

    let spot = state
        .store()
        .insert_spot_type(NewSpotType {
            name: req.name.trim().to_string(),
            price: req.price,
            limit: req.limit,
            description: req.description,
        })
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "create spot type"))?;

    tracing::info!(spot_id = %spot.id, request_id = %request_id, limit = spot.limit, "Spot type created");
    Ok((StatusCode::CREATED, Json(SpotTypeWithCount::new(spot, 0))))
}

async fn update_spot(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(spot_id): Path<String>,
    Json(req): Json<UpdateSpotRequest>,
) -> Result<Json<SpotTypeWithCount>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    let spot_id: SpotTypeId = parse_path_id(&spot_id, "spot", request_id)?;

    let mut spot = load_spot(&state, spot_id, request_id).await?.spot_type;
    if let Some(name) = req.name {
        spot.name = name.trim().to_string();
    }
    if let Some(price) = req.price {
        spot.price = price;
    }
    if let Some(limit) = req.limit {
        // Lowering the limit below the current count is allowed; existing
        // holders keep their spot.
        spot.limit = limit;
    }
    if let Some(description) = req.description {
        spot.description = Some(description);
    }
    validate(&spot.name, spot.price, spot.limit, request_id)?;

    state
        .store()
        .save_spot_type(&spot)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "update spot type"))?;

    Ok(Json(load_spot(&state, spot_id, request_id).await?))
}

async fn delete_spot(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(spot_id): Path<String>,
) -> Result<Json<SpotTypeWithCount>, ApiError> {
    authz::require_admin(&state, &ctx).await?;
    let request_id = ctx.request_id.as_str();
    let spot_id: SpotTypeId = parse_path_id(&spot_id, "spot", request_id)?;

    let spot = load_spot(&state, spot_id, request_id).await?;
    let deleted = state
        .store()
        .delete_spot_type(spot_id)
        .await
        .map_err(|e| ApiError::from_store(e, request_id, "delete spot type"))?;
    if !deleted {
        return Err(
            ApiError::not_found("spot_not_found", format!("Spot type {spot_id} not found"))
                .with_request_id(request_id.to_string()),
        );
    }

    tracing::info!(spot_id = %spot_id, request_id = %request_id, "Spot type deleted");
    Ok(Json(spot))
}
