use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::CancellationReceipt;
use crate::error::AppError;
use crate::models::order::{DeliveryEstimate, Order, OrderStatus};
use crate::models::rider::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", post(advance_status))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/rating", post(rate_order))
        .route("/orders/:id/estimate", get(delivery_estimate))
}

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub order_total: f64,
}

#[derive(Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct RateOrderRequest {
    pub rating: i64,
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .tracker
        .place_order(payload.pickup, payload.dropoff, payload.order_total)
        .await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.tracker.get_order(id).await?))
}

async fn advance_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.tracker.advance_status(id, payload.status).await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<CancellationReceipt>, AppError> {
    let receipt = state.tracker.cancel_order(id, &payload.reason).await?;
    Ok(Json(receipt))
}

async fn rate_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.tracker.rate_order(id, payload.rating).await?;
    Ok(Json(order))
}

async fn delivery_estimate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryEstimate>, AppError> {
    Ok(Json(state.tracker.delivery_estimate(id).await?))
}
