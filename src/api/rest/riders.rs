use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::lifecycle::AvailableOrder;
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::rider::{GeoPoint, Rider};
use crate::models::tracking::TrackingEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/riders", post(register_rider))
        .route("/riders/:id", get(get_rider))
        .route("/riders/:id/availability", post(set_availability))
        .route("/riders/:id/location", post(update_location))
        .route("/riders/:id/available-orders", get(available_orders))
        .route("/riders/:id/deliveries", get(current_deliveries))
        .route("/riders/:id/accept/:order_id", post(accept_order))
        .route("/riders/:id/complete/:order_id", post(complete_delivery))
        .route(
            "/riders/:id/orders/:order_id/location",
            post(record_location),
        )
}

#[derive(Deserialize)]
pub struct RegisterRiderRequest {
    pub name: String,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct AvailableOrdersQuery {
    pub max_distance_km: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub location: GeoPoint,
}

async fn register_rider(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRiderRequest>,
) -> Result<Json<Rider>, AppError> {
    let rider = state
        .tracker
        .register_rider(&payload.name, payload.location)
        .await?;
    Ok(Json(rider))
}

async fn get_rider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Rider>, AppError> {
    Ok(Json(state.tracker.get_rider(id).await?))
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Rider>, AppError> {
    let rider = state
        .tracker
        .set_availability(id, payload.available, payload.location)
        .await?;
    Ok(Json(rider))
}

async fn available_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailableOrdersQuery>,
) -> Result<Json<Vec<AvailableOrder>>, AppError> {
    let max_distance_km = query
        .max_distance_km
        .unwrap_or(state.config.default_search_radius_km);
    if !max_distance_km.is_finite() || max_distance_km < 0.0 {
        return Err(AppError::BadRequest(
            "max_distance_km must be a non-negative number".to_string(),
        ));
    }
    let limit = query.limit.unwrap_or(state.config.default_available_limit);

    let orders = state
        .tracker
        .available_orders(id, max_distance_km, limit)
        .await?;
    Ok(Json(orders))
}

async fn current_deliveries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.tracker.current_deliveries(id).await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path((rider_id, order_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.tracker.accept_order(rider_id, order_id).await?))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path((rider_id, order_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state.tracker.complete_delivery(rider_id, order_id).await?,
    ))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<Rider>, AppError> {
    let rider = state.tracker.update_location(id, payload.location).await?;
    Ok(Json(rider))
}

async fn record_location(
    State(state): State<Arc<AppState>>,
    Path((rider_id, order_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<TrackingEvent>, AppError> {
    let event = state
        .tracker
        .record_location(rider_id, order_id, payload.location)
        .await?;
    Ok(Json(event))
}
