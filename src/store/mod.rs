pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::order::Order;
use crate::models::rider::Rider;
use crate::models::tracking::TrackingEvent;

pub use memory::InMemoryStore;

/// Persistence seam for the lifecycle tracker. Implementations only store and
/// return records; every lifecycle rule lives in the tracker, which also
/// serializes writers per order, so implementations need no cross-record
/// transactions.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    async fn load_order(&self, order_id: Uuid) -> Result<Order, LifecycleError>;

    async fn save_order(&self, order: Order) -> Result<(), LifecycleError>;

    async fn list_orders(&self) -> Result<Vec<Order>, LifecycleError>;

    async fn append_tracking_event(&self, event: TrackingEvent) -> Result<(), LifecycleError>;

    /// Events for `order_id`, oldest first. Unknown orders yield an empty list.
    async fn load_history(&self, order_id: Uuid) -> Result<Vec<TrackingEvent>, LifecycleError>;

    async fn load_rider(&self, rider_id: Uuid) -> Result<Rider, LifecycleError>;

    async fn save_rider(&self, rider: Rider) -> Result<(), LifecycleError>;
}
