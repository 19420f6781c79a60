pub mod lifecycle;
pub mod locks;
pub mod pricing;

pub use lifecycle::{AvailableOrder, CancellationReceipt, LifecycleTracker};
pub use pricing::{DeliveryPricing, DistancePricing, FlatPricing};
