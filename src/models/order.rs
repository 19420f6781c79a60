use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::rider::GeoPoint;

/// Order lifecycle. Declaration order is the forward delivery path; `Cancelled`
/// sits outside it and is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Placed,
    Confirmed,
    Preparing,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Placed,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// The single forward step from `self`, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Placed => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::ReadyForPickup),
            OrderStatus::ReadyForPickup => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        target == OrderStatus::Cancelled || self.next() == Some(target)
    }

    pub fn accepts_rider(self) -> bool {
        self == OrderStatus::ReadyForPickup
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Placed => "PLACED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::ReadyForPickup => "READY_FOR_PICKUP",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub rider_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub order_total: f64,
    pub delivery_fee: Option<f64>,
    pub cancellation_reason: Option<String>,
    pub rating: Option<u8>,
    /// Number of tracking events recorded so far.
    pub tracking_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(pickup: GeoPoint, dropoff: GeoPoint, order_total: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: OrderStatus::Placed,
            rider_id: None,
            pickup,
            dropoff,
            order_total,
            delivery_fee: None,
            cancellation_reason: None,
            rating: None,
            tracking_sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryEstimate {
    pub preparation_minutes: u32,
    pub travel_minutes: u32,
    pub total_minutes: u32,
}

impl DeliveryEstimate {
    pub fn for_status(status: OrderStatus) -> Self {
        let (preparation_minutes, travel_minutes) = match status {
            OrderStatus::Placed => (20, 15),
            OrderStatus::Confirmed => (18, 15),
            OrderStatus::Preparing => (10, 15),
            OrderStatus::ReadyForPickup => (0, 12),
            OrderStatus::OutForDelivery => (0, 8),
            OrderStatus::Delivered | OrderStatus::Cancelled => (0, 0),
        };

        Self {
            preparation_minutes,
            travel_minutes,
            total_minutes: preparation_minutes + travel_minutes,
        }
    }
}

/// Share of the order total returned to the customer when an order in a given
/// status is cancelled. This is a quote only; no payment is moved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RefundQuote {
    pub percentage: u8,
    pub amount: f64,
}

impl RefundQuote {
    pub fn for_cancellation(status: OrderStatus, order_total: f64) -> Self {
        let percentage = match status {
            OrderStatus::Preparing => 80,
            OrderStatus::ReadyForPickup | OrderStatus::OutForDelivery => 50,
            OrderStatus::Placed | OrderStatus::Confirmed => 100,
            OrderStatus::Delivered | OrderStatus::Cancelled => 0,
        };

        let amount = (order_total * f64::from(percentage)).round() / 100.0;
        Self { percentage, amount }
    }
}
