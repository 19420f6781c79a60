use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::tracking::{LatestTracking, TrackingEvent};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/tracking", get(get_history))
        .route("/orders/:id/tracking/latest", get(get_latest))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TrackingEvent>>, AppError> {
    Ok(Json(state.tracker.get_history(id).await?))
}

async fn get_latest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LatestTracking>, AppError> {
    Ok(Json(state.tracker.get_latest(id).await?))
}
