use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::order::Order;
use crate::models::rider::Rider;
use crate::models::tracking::TrackingEvent;
use crate::store::TrackerStore;

#[derive(Default)]
pub struct InMemoryStore {
    orders: DashMap<Uuid, Order>,
    riders: DashMap<Uuid, Rider>,
    history: DashMap<Uuid, Vec<TrackingEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn rider_count(&self) -> usize {
        self.riders.len()
    }

    pub fn event_count(&self) -> usize {
        self.history.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl TrackerStore for InMemoryStore {
    async fn load_order(&self, order_id: Uuid) -> Result<Order, LifecycleError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or(LifecycleError::OrderNotFound(order_id))
    }

    async fn save_order(&self, order: Order) -> Result<(), LifecycleError> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<Order>, LifecycleError> {
        Ok(self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn append_tracking_event(&self, event: TrackingEvent) -> Result<(), LifecycleError> {
        self.history.entry(event.order_id).or_default().push(event);
        Ok(())
    }

    async fn load_history(&self, order_id: Uuid) -> Result<Vec<TrackingEvent>, LifecycleError> {
        Ok(self
            .history
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn load_rider(&self, rider_id: Uuid) -> Result<Rider, LifecycleError> {
        self.riders
            .get(&rider_id)
            .map(|entry| entry.value().clone())
            .ok_or(LifecycleError::RiderNotFound(rider_id))
    }

    async fn save_rider(&self, rider: Rider) -> Result<(), LifecycleError> {
        self.riders.insert(rider.id, rider);
        Ok(())
    }
}
