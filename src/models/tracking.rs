use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderStatus;
use crate::models::rider::GeoPoint;

/// Immutable entry in an order's history. `sequence` starts at 1 and is
/// strictly increasing per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub sequence: u64,
    pub status: OrderStatus,
    pub location: Option<GeoPoint>,
    pub rider_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatestTracking {
    Event(TrackingEvent),
    Status { order_id: Uuid, status: OrderStatus },
}

impl LatestTracking {
    pub fn status(&self) -> OrderStatus {
        match self {
            LatestTracking::Event(event) => event.status,
            LatestTracking::Status { status, .. } => *status,
        }
    }
}
