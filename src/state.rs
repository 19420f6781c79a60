use std::sync::Arc;

use crate::config::Config;
use crate::engine::lifecycle::LifecycleTracker;
use crate::engine::pricing::DistancePricing;
use crate::observability::metrics::Metrics;
use crate::store::InMemoryStore;

pub struct AppState {
    pub tracker: LifecycleTracker,
    pub store: Arc<InMemoryStore>,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let pricing = Arc::new(DistancePricing::new(
            config.base_delivery_fee,
            config.delivery_fee_per_km,
        ));
        let metrics = Metrics::new();
        let tracker = LifecycleTracker::new(
            store.clone(),
            pricing,
            config.event_buffer_size,
            metrics.clone(),
        );

        Self {
            tracker,
            store,
            metrics,
            config,
        }
    }
}
