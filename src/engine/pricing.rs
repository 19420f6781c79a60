use async_trait::async_trait;

use crate::error::LifecycleError;
use crate::geo::distance_km;
use crate::models::order::Order;

/// External pricing collaborator consulted when a delivery completes and when
/// riders browse open orders.
#[async_trait]
pub trait DeliveryPricing: Send + Sync {
    async fn compute_delivery_fee(&self, order: &Order) -> Result<f64, LifecycleError>;
}

/// Base fee plus a per-kilometre charge over the pickup to dropoff distance.
#[derive(Debug, Clone)]
pub struct DistancePricing {
    pub base_fee: f64,
    pub per_km: f64,
}

impl DistancePricing {
    pub fn new(base_fee: f64, per_km: f64) -> Self {
        Self { base_fee, per_km }
    }
}

#[async_trait]
impl DeliveryPricing for DistancePricing {
    async fn compute_delivery_fee(&self, order: &Order) -> Result<f64, LifecycleError> {
        let km = distance_km(&order.pickup, &order.dropoff);
        Ok(round_cents(self.base_fee + km * self.per_km))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlatPricing(pub f64);

#[async_trait]
impl DeliveryPricing for FlatPricing {
    async fn compute_delivery_fee(&self, _order: &Order) -> Result<f64, LifecycleError> {
        Ok(self.0)
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
