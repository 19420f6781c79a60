use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rider {
    pub id: Uuid,
    pub name: String,
    pub available: bool,
    pub location: Option<GeoPoint>,
    pub current_order_ids: BTreeSet<Uuid>,
    pub earnings_total: f64,
    pub completed_deliveries: u32,
    pub updated_at: DateTime<Utc>,
}

impl Rider {
    pub fn new(name: String, location: Option<GeoPoint>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            available: true,
            location,
            current_order_ids: BTreeSet::new(),
            earnings_total: 0.0,
            completed_deliveries: 0,
            updated_at: Utc::now(),
        }
    }

    /// Drops `order_id` from the active set; returns whether it was held.
    pub fn release(&mut self, order_id: Uuid) -> bool {
        let removed = self.current_order_ids.remove(&order_id);
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn credit(&mut self, fee: f64) {
        self.earnings_total += fee.max(0.0);
        self.completed_deliveries = self.completed_deliveries.saturating_add(1);
        self.updated_at = Utc::now();
    }
}
