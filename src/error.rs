use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::OrderStatus;

/// Failures raised by the lifecycle tracker. Each one is scoped to the single
/// operation that produced it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("rider {0} not found")]
    RiderNotFound(Uuid),

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order {order_id} is already {status}")]
    TerminalStateViolation { order_id: Uuid, status: OrderStatus },

    #[error("order {order_id} is already assigned to rider {rider_id}")]
    AlreadyAssigned { order_id: Uuid, rider_id: Uuid },

    #[error("order {order_id} is {status} and not eligible for this operation")]
    NotEligible { order_id: Uuid, status: OrderStatus },

    #[error("rider {rider_id} is not assigned to order {order_id}")]
    Unauthorized { rider_id: Uuid, order_id: Uuid },

    #[error("rider {0} is offline")]
    RiderUnavailable(Uuid),

    #[error("rider {rider_id} still has {active} active deliveries")]
    RiderBusy { rider_id: Uuid, active: usize },

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("order {0} has already been rated")]
    AlreadyRated(Uuid),

    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),
}

impl LifecycleError {
    /// Stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::OrderNotFound(_) | LifecycleError::RiderNotFound(_) => "not_found",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
            LifecycleError::TerminalStateViolation { .. } => "terminal_state",
            LifecycleError::AlreadyAssigned { .. } => "already_assigned",
            LifecycleError::NotEligible { .. } => "not_eligible",
            LifecycleError::Unauthorized { .. } => "unauthorized",
            LifecycleError::RiderUnavailable(_) => "rider_unavailable",
            LifecycleError::RiderBusy { .. } => "rider_busy",
            LifecycleError::InvalidRating(_) => "invalid_rating",
            LifecycleError::AlreadyRated(_) => "already_rated",
            LifecycleError::InvalidCoordinate { .. } => "invalid_coordinate",
            LifecycleError::Validation(_) => "validation",
            LifecycleError::Store(_) => "store",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::OrderNotFound(_) | LifecycleError::RiderNotFound(_) => {
                AppError::NotFound(message)
            }
            LifecycleError::InvalidTransition { .. }
            | LifecycleError::TerminalStateViolation { .. }
            | LifecycleError::AlreadyAssigned { .. }
            | LifecycleError::NotEligible { .. }
            | LifecycleError::RiderUnavailable(_)
            | LifecycleError::RiderBusy { .. }
            | LifecycleError::AlreadyRated(_) => AppError::Conflict(message),
            LifecycleError::Unauthorized { .. } => AppError::Forbidden(message),
            LifecycleError::InvalidRating(_)
            | LifecycleError::InvalidCoordinate { .. }
            | LifecycleError::Validation(_) => AppError::BadRequest(message),
            LifecycleError::Store(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
