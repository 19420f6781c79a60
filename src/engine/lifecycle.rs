use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::locks::{KeyedGuard, KeyedLocks};
use crate::engine::pricing::DeliveryPricing;
use crate::error::LifecycleError;
use crate::geo::within_radius;
use crate::models::order::{DeliveryEstimate, Order, OrderStatus, RefundQuote};
use crate::models::rider::{GeoPoint, Rider};
use crate::models::tracking::{LatestTracking, TrackingEvent};
use crate::observability::metrics::Metrics;
use crate::store::TrackerStore;

#[derive(Debug, Clone, Serialize)]
pub struct AvailableOrder {
    pub order: Order,
    pub distance_km: f64,
    pub estimated_fee: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationReceipt {
    pub order: Order,
    pub refund: RefundQuote,
}

// A rider record already rewritten for an order write that has not happened
// yet. Holds the rider lock until the order outcome is known.
struct RiderChange<'a> {
    _guard: KeyedGuard<'a>,
    before: Rider,
    active_delta: i64,
}

/// Mediates every order status change and rider assignment.
///
/// Mutations of one order run under that order's lock, so concurrent calls on
/// the same order are serialized and exactly one of two racing writers wins.
/// Rider records are shared between orders and get their own lock, which is
/// only ever taken while an order lock is already held (or on its own), never
/// the other way around.
pub struct LifecycleTracker {
    store: Arc<dyn TrackerStore>,
    pricing: Arc<dyn DeliveryPricing>,
    order_locks: KeyedLocks,
    rider_locks: KeyedLocks,
    events_tx: broadcast::Sender<TrackingEvent>,
    metrics: Metrics,
}

impl LifecycleTracker {
    pub fn new(
        store: Arc<dyn TrackerStore>,
        pricing: Arc<dyn DeliveryPricing>,
        event_buffer_size: usize,
        metrics: Metrics,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            store,
            pricing,
            order_locks: KeyedLocks::new(),
            rider_locks: KeyedLocks::new(),
            events_tx,
            metrics,
        }
    }

    /// Live feed of appended tracking events. Lagging receivers miss events;
    /// [`LifecycleTracker::get_history`] stays authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events_tx.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn place_order(
        &self,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        order_total: f64,
    ) -> Result<Order, LifecycleError> {
        self.observed("place_order", async {
            ensure_valid_point(&pickup)?;
            ensure_valid_point(&dropoff)?;
            if !order_total.is_finite() || order_total < 0.0 {
                return Err(LifecycleError::Validation(
                    "order_total must be a non-negative amount".to_string(),
                ));
            }

            let order = Order::new(pickup, dropoff, order_total);
            self.store.save_order(order.clone()).await?;

            info!(order_id = %order.id, "order placed");
            Ok(order)
        })
        .await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, LifecycleError> {
        self.store.load_order(order_id).await
    }

    pub async fn advance_status(
        &self,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<Order, LifecycleError> {
        self.observed("advance_status", async {
            let _order_guard = self.order_locks.lock(order_id).await;
            let mut order = self.store.load_order(order_id).await?;
            ensure_not_terminal(&order)?;

            if !order.status.can_transition_to(target) {
                return Err(LifecycleError::InvalidTransition {
                    from: order.status,
                    to: target,
                });
            }

            let change = match target {
                OrderStatus::Delivered => self.settle_delivery(&mut order).await?,
                OrderStatus::Cancelled => self.release_rider(&order).await?,
                _ => None,
            };

            let committed = self.commit_transition(order, target).await;
            let (order, _event) = self.finish_rider_change(change, committed).await?;
            Ok(order)
        })
        .await
    }

    pub async fn accept_order(
        &self,
        rider_id: Uuid,
        order_id: Uuid,
    ) -> Result<Order, LifecycleError> {
        self.observed("accept_order", async {
            let _order_guard = self.order_locks.lock(order_id).await;
            let mut order = self.store.load_order(order_id).await?;
            ensure_not_terminal(&order)?;

            if let Some(assigned) = order.rider_id {
                return Err(LifecycleError::AlreadyAssigned {
                    order_id,
                    rider_id: assigned,
                });
            }

            if !order.status.accepts_rider() {
                return Err(LifecycleError::NotEligible {
                    order_id,
                    status: order.status,
                });
            }

            let rider_guard = self.rider_locks.lock(rider_id).await;
            let mut rider = self.store.load_rider(rider_id).await?;
            if !rider.available {
                return Err(LifecycleError::RiderUnavailable(rider_id));
            }

            let before = rider.clone();
            rider.current_order_ids.insert(order_id);
            rider.updated_at = Utc::now();
            self.store.save_rider(rider).await?;
            let change = RiderChange {
                _guard: rider_guard,
                before,
                active_delta: 1,
            };

            order.rider_id = Some(rider_id);
            order.updated_at = Utc::now().max(order.updated_at);
            let saved = self.store.save_order(order.clone()).await;
            self.finish_rider_change(Some(change), saved).await?;

            info!(order_id = %order_id, rider_id = %rider_id, "order accepted by rider");
            Ok(order)
        })
        .await
    }

    pub async fn complete_delivery(
        &self,
        rider_id: Uuid,
        order_id: Uuid,
    ) -> Result<Order, LifecycleError> {
        self.observed("complete_delivery", async {
            let _order_guard = self.order_locks.lock(order_id).await;
            let mut order = self.store.load_order(order_id).await?;
            ensure_not_terminal(&order)?;
            ensure_assigned_to(&order, rider_id)?;

            if order.status != OrderStatus::OutForDelivery {
                return Err(LifecycleError::InvalidTransition {
                    from: order.status,
                    to: OrderStatus::Delivered,
                });
            }

            let change = self.settle_delivery(&mut order).await?;
            let committed = self
                .commit_transition(order, OrderStatus::Delivered)
                .await;
            let (order, _event) = self.finish_rider_change(change, committed).await?;
            Ok(order)
        })
        .await
    }

    /// Cancels a non-terminal order and quotes the refund owed for the status
    /// it was cancelled from.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<CancellationReceipt, LifecycleError> {
        self.observed("cancel_order", async {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(LifecycleError::Validation(
                    "cancellation reason cannot be empty".to_string(),
                ));
            }

            let _order_guard = self.order_locks.lock(order_id).await;
            let mut order = self.store.load_order(order_id).await?;
            ensure_not_terminal(&order)?;

            let refund = RefundQuote::for_cancellation(order.status, order.order_total);
            let change = self.release_rider(&order).await?;
            order.cancellation_reason = Some(reason.to_string());

            let committed = self
                .commit_transition(order, OrderStatus::Cancelled)
                .await;
            let (order, _event) = self.finish_rider_change(change, committed).await?;

            info!(
                order_id = %order_id,
                refund_percentage = refund.percentage,
                refund_amount = refund.amount,
                "refund quoted for cancelled order"
            );
            Ok(CancellationReceipt { order, refund })
        })
        .await
    }

    pub async fn record_location(
        &self,
        rider_id: Uuid,
        order_id: Uuid,
        location: GeoPoint,
    ) -> Result<TrackingEvent, LifecycleError> {
        self.observed("record_location", async {
            ensure_valid_point(&location)?;

            let _order_guard = self.order_locks.lock(order_id).await;
            let order = self.store.load_order(order_id).await?;
            ensure_not_terminal(&order)?;
            ensure_assigned_to(&order, rider_id)?;

            let rider_guard = self.rider_locks.lock(rider_id).await;
            let mut rider = self.store.load_rider(rider_id).await?;
            let before = rider.clone();
            rider.location = Some(location);
            rider.updated_at = Utc::now();
            self.store.save_rider(rider).await?;
            let change = RiderChange {
                _guard: rider_guard,
                before,
                active_delta: 0,
            };

            let status = order.status;
            let appended = self
                .append_event(order, status, Some(location), Some(rider_id))
                .await;
            let (_order, event) = self.finish_rider_change(Some(change), appended).await?;
            Ok(event)
        })
        .await
    }

    /// Moves a rider without touching any order. Orders the rider carries get
    /// no tracking event; use [`LifecycleTracker::record_location`] for that.
    pub async fn update_location(
        &self,
        rider_id: Uuid,
        location: GeoPoint,
    ) -> Result<Rider, LifecycleError> {
        self.observed("update_location", async {
            ensure_valid_point(&location)?;

            let _rider_guard = self.rider_locks.lock(rider_id).await;
            let mut rider = self.store.load_rider(rider_id).await?;
            rider.location = Some(location);
            rider.updated_at = Utc::now();
            self.store.save_rider(rider.clone()).await?;

            info!(rider_id = %rider_id, "rider location updated");
            Ok(rider)
        })
        .await
    }

    pub async fn get_history(&self, order_id: Uuid) -> Result<Vec<TrackingEvent>, LifecycleError> {
        self.store.load_order(order_id).await?;

        let mut history = self.store.load_history(order_id).await?;
        history.sort_by_key(|event| event.sequence);
        Ok(history)
    }

    pub async fn get_latest(&self, order_id: Uuid) -> Result<LatestTracking, LifecycleError> {
        let order = self.store.load_order(order_id).await?;
        let history = self.store.load_history(order_id).await?;

        let latest = history
            .into_iter()
            .max_by_key(|event| event.sequence)
            .map(LatestTracking::Event)
            .unwrap_or(LatestTracking::Status {
                order_id,
                status: order.status,
            });
        Ok(latest)
    }

    pub async fn rate_order(&self, order_id: Uuid, rating: i64) -> Result<Order, LifecycleError> {
        self.observed("rate_order", async {
            let stars = u8::try_from(rating)
                .ok()
                .filter(|stars| (1..=5).contains(stars))
                .ok_or(LifecycleError::InvalidRating(rating))?;

            let _order_guard = self.order_locks.lock(order_id).await;
            let mut order = self.store.load_order(order_id).await?;

            if order.status != OrderStatus::Delivered {
                return Err(LifecycleError::NotEligible {
                    order_id,
                    status: order.status,
                });
            }
            if order.rating.is_some() {
                return Err(LifecycleError::AlreadyRated(order_id));
            }

            order.rating = Some(stars);
            self.store.save_order(order.clone()).await?;

            info!(order_id = %order_id, rating = stars, "order rated");
            Ok(order)
        })
        .await
    }

    pub async fn delivery_estimate(&self, order_id: Uuid) -> Result<DeliveryEstimate, LifecycleError> {
        let order = self.store.load_order(order_id).await?;
        Ok(DeliveryEstimate::for_status(order.status))
    }

    pub async fn register_rider(
        &self,
        name: &str,
        location: Option<GeoPoint>,
    ) -> Result<Rider, LifecycleError> {
        self.observed("register_rider", async {
            let name = name.trim();
            if name.is_empty() {
                return Err(LifecycleError::Validation("name cannot be empty".to_string()));
            }
            if let Some(point) = &location {
                ensure_valid_point(point)?;
            }

            let rider = Rider::new(name.to_string(), location);
            self.store.save_rider(rider.clone()).await?;

            info!(rider_id = %rider.id, "rider registered");
            Ok(rider)
        })
        .await
    }

    pub async fn get_rider(&self, rider_id: Uuid) -> Result<Rider, LifecycleError> {
        self.store.load_rider(rider_id).await
    }

    pub async fn set_availability(
        &self,
        rider_id: Uuid,
        available: bool,
        location: Option<GeoPoint>,
    ) -> Result<Rider, LifecycleError> {
        self.observed("set_availability", async {
            if let Some(point) = &location {
                ensure_valid_point(point)?;
            }

            let _rider_guard = self.rider_locks.lock(rider_id).await;
            let mut rider = self.store.load_rider(rider_id).await?;

            if !available && !rider.current_order_ids.is_empty() {
                return Err(LifecycleError::RiderBusy {
                    rider_id,
                    active: rider.current_order_ids.len(),
                });
            }

            rider.available = available;
            if location.is_some() {
                rider.location = location;
            }
            rider.updated_at = Utc::now();
            self.store.save_rider(rider.clone()).await?;

            info!(rider_id = %rider_id, available, "rider availability changed");
            Ok(rider)
        })
        .await
    }

    /// Orders waiting for pickup with no rider, within `max_distance_km` of the
    /// rider's last known location, nearest first.
    pub async fn available_orders(
        &self,
        rider_id: Uuid,
        max_distance_km: f64,
        limit: usize,
    ) -> Result<Vec<AvailableOrder>, LifecycleError> {
        let rider = self.store.load_rider(rider_id).await?;
        if !rider.available {
            return Err(LifecycleError::RiderUnavailable(rider_id));
        }
        let origin = rider.location.ok_or_else(|| {
            LifecycleError::Validation(format!("rider {rider_id} has no known location"))
        })?;

        let mut nearby = Vec::new();
        for order in self.store.list_orders().await? {
            if !order.status.accepts_rider() || order.rider_id.is_some() {
                continue;
            }
            let Some(distance_km) = within_radius(&origin, &order.pickup, max_distance_km) else {
                continue;
            };

            let estimated_fee = self.pricing.compute_delivery_fee(&order).await?;
            nearby.push(AvailableOrder {
                order,
                distance_km,
                estimated_fee,
            });
        }

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby.truncate(limit);
        Ok(nearby)
    }

    pub async fn current_deliveries(&self, rider_id: Uuid) -> Result<Vec<Order>, LifecycleError> {
        let rider = self.store.load_rider(rider_id).await?;

        let mut orders = Vec::with_capacity(rider.current_order_ids.len());
        for order_id in &rider.current_order_ids {
            orders.push(self.store.load_order(*order_id).await?);
        }
        Ok(orders)
    }

    // Fixes the fee and credits the assigned rider. Must run under the order lock.
    // The returned change keeps the rider locked until the order is committed.
    async fn settle_delivery(
        &self,
        order: &mut Order,
    ) -> Result<Option<RiderChange<'_>>, LifecycleError> {
        let Some(rider_id) = order.rider_id else {
            return Ok(None);
        };

        let fee = self.pricing.compute_delivery_fee(order).await?;

        let rider_guard = self.rider_locks.lock(rider_id).await;
        let mut rider = self.store.load_rider(rider_id).await?;
        let before = rider.clone();
        let mut active_delta = 0;
        if rider.release(order.id) {
            rider.credit(fee);
            self.store.save_rider(rider).await?;
            active_delta = -1;
            info!(order_id = %order.id, rider_id = %rider_id, fee, "rider credited for delivery");
        } else {
            warn!(order_id = %order.id, rider_id = %rider_id, "rider no longer holds order, not credited");
        }

        order.delivery_fee = Some(fee);
        Ok(Some(RiderChange {
            _guard: rider_guard,
            before,
            active_delta,
        }))
    }

    // Must run under the order lock.
    async fn release_rider(&self, order: &Order) -> Result<Option<RiderChange<'_>>, LifecycleError> {
        let Some(rider_id) = order.rider_id else {
            return Ok(None);
        };

        let rider_guard = self.rider_locks.lock(rider_id).await;
        let mut rider = self.store.load_rider(rider_id).await?;
        let before = rider.clone();
        let mut active_delta = 0;
        if rider.release(order.id) {
            self.store.save_rider(rider).await?;
            active_delta = -1;
        }

        Ok(Some(RiderChange {
            _guard: rider_guard,
            before,
            active_delta,
        }))
    }

    // Applies the gauge delta once the order write went through, or puts the
    // rider record back when it did not. Releases the rider lock either way.
    async fn finish_rider_change<T>(
        &self,
        change: Option<RiderChange<'_>>,
        committed: Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        let Some(change) = change else {
            return committed;
        };

        match &committed {
            Ok(_) => self.metrics.active_deliveries.add(change.active_delta),
            Err(err) => {
                let rider_id = change.before.id;
                if let Err(restore_err) = self.store.save_rider(change.before).await {
                    error!(
                        rider_id = %rider_id,
                        error = %restore_err,
                        cause = %err,
                        "could not restore rider after failed order write"
                    );
                }
            }
        }
        committed
    }

    async fn commit_transition(
        &self,
        mut order: Order,
        target: OrderStatus,
    ) -> Result<(Order, TrackingEvent), LifecycleError> {
        let from = order.status;
        order.status = target;

        let rider_id = order.rider_id;
        let committed = self.append_event(order, target, None, rider_id).await?;

        self.metrics
            .transitions_total
            .with_label_values(&[target.as_str()])
            .inc();
        info!(
            order_id = %committed.0.id,
            from = %from,
            to = %target,
            "order status changed"
        );
        Ok(committed)
    }

    // Saves the order with its bumped sequence, then appends the matching event.
    // A failed append puts the stored record back as it was before the call.
    // Timestamps are clamped to the order's last update so history never goes
    // backwards even if the wall clock does.
    async fn append_event(
        &self,
        mut order: Order,
        status: OrderStatus,
        location: Option<GeoPoint>,
        rider_id: Option<Uuid>,
    ) -> Result<(Order, TrackingEvent), LifecycleError> {
        let previous = self.store.load_order(order.id).await?;
        let timestamp = Utc::now().max(order.updated_at);
        order.tracking_sequence += 1;
        order.updated_at = timestamp;

        let event = TrackingEvent {
            id: Uuid::new_v4(),
            order_id: order.id,
            sequence: order.tracking_sequence,
            status,
            location,
            rider_id,
            timestamp,
        };

        self.store.save_order(order.clone()).await?;
        if let Err(err) = self.store.append_tracking_event(event.clone()).await {
            if let Err(restore_err) = self.store.save_order(previous).await {
                error!(
                    order_id = %order.id,
                    error = %restore_err,
                    "could not restore order after failed event append"
                );
            }
            return Err(err);
        }
        self.metrics.tracking_events_total.inc();

        // No live subscribers is fine; history is already persisted.
        let _ = self.events_tx.send(event.clone());
        Ok((order, event))
    }

    async fn observed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, LifecycleError>
    where
        F: Future<Output = Result<T, LifecycleError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.metrics
            .operation_latency_seconds
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => "success",
            Err(err @ LifecycleError::Store(_)) => {
                error!(operation, error = %err, "lifecycle operation failed");
                err.kind()
            }
            Err(err) => {
                warn!(operation, error = %err, "lifecycle operation rejected");
                err.kind()
            }
        };
        self.metrics
            .operations_total
            .with_label_values(&[operation, outcome])
            .inc();

        result
    }
}

fn ensure_not_terminal(order: &Order) -> Result<(), LifecycleError> {
    if order.status.is_terminal() {
        return Err(LifecycleError::TerminalStateViolation {
            order_id: order.id,
            status: order.status,
        });
    }
    Ok(())
}

fn ensure_assigned_to(order: &Order, rider_id: Uuid) -> Result<(), LifecycleError> {
    if order.rider_id != Some(rider_id) {
        return Err(LifecycleError::Unauthorized {
            rider_id,
            order_id: order.id,
        });
    }
    Ok(())
}

fn ensure_valid_point(point: &GeoPoint) -> Result<(), LifecycleError> {
    if !point.is_valid() {
        return Err(LifecycleError::InvalidCoordinate {
            lat: point.lat,
            lng: point.lng,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::LifecycleTracker;
    use crate::engine::pricing::FlatPricing;
    use crate::error::LifecycleError;
    use crate::models::order::{Order, OrderStatus};
    use crate::models::rider::{GeoPoint, Rider};
    use crate::observability::metrics::Metrics;
    use crate::store::{InMemoryStore, TrackerStore};

    const PICKUP: GeoPoint = GeoPoint {
        lat: 52.5200,
        lng: 13.4050,
    };
    const DROPOFF: GeoPoint = GeoPoint {
        lat: 52.5300,
        lng: 13.4200,
    };

    fn tracker() -> LifecycleTracker {
        LifecycleTracker::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FlatPricing(5.0)),
            16,
            Metrics::new(),
        )
    }

    async fn order_at(tracker: &LifecycleTracker, status: OrderStatus) -> Order {
        let order = tracker.place_order(PICKUP, DROPOFF, 25.0).await.unwrap();
        let mut current = order;
        while current.status != status {
            let next = current.status.next().unwrap();
            current = tracker.advance_status(current.id, next).await.unwrap();
        }
        current
    }

    async fn rider(tracker: &LifecycleTracker) -> Rider {
        tracker.register_rider("Rita", Some(PICKUP)).await.unwrap()
    }

    #[tokio::test]
    async fn placing_an_order_records_no_event() {
        let tracker = tracker();
        let order = tracker.place_order(PICKUP, DROPOFF, 25.0).await.unwrap();

        assert_eq!(order.status, OrderStatus::Placed);
        assert!(tracker.get_history(order.id).await.unwrap().is_empty());
        assert_eq!(
            tracker.get_latest(order.id).await.unwrap().status(),
            OrderStatus::Placed
        );
    }

    #[tokio::test]
    async fn skipping_a_step_is_an_invalid_transition() {
        let tracker = tracker();
        let order = order_at(&tracker, OrderStatus::Confirmed).await;

        let err = tracker
            .advance_status(order.id, OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: OrderStatus::Confirmed,
                to: OrderStatus::Delivered,
            }
        );

        let unchanged = tracker.get_order(order.id).await.unwrap();
        assert_eq!(unchanged.status, OrderStatus::Confirmed);
        assert_eq!(tracker.get_history(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn moving_backwards_is_rejected() {
        let tracker = tracker();
        let order = order_at(&tracker, OrderStatus::Preparing).await;

        let err = tracker
            .advance_status(order.id, OrderStatus::Placed)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let tracker = tracker();
        let id = Uuid::new_v4();

        assert_eq!(
            tracker
                .advance_status(id, OrderStatus::Confirmed)
                .await
                .unwrap_err(),
            LifecycleError::OrderNotFound(id)
        );
        assert_eq!(
            tracker.get_history(id).await.unwrap_err(),
            LifecycleError::OrderNotFound(id)
        );
    }

    #[tokio::test]
    async fn accept_requires_ready_for_pickup() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::Preparing).await;

        let err = tracker.accept_order(rider.id, order.id).await.unwrap_err();
        assert_eq!(
            err,
            LifecycleError::NotEligible {
                order_id: order.id,
                status: OrderStatus::Preparing,
            }
        );
    }

    #[tokio::test]
    async fn offline_rider_cannot_accept() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        tracker.set_availability(rider.id, false, None).await.unwrap();
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;

        let err = tracker.accept_order(rider.id, order.id).await.unwrap_err();
        assert_eq!(err, LifecycleError::RiderUnavailable(rider.id));
        assert!(tracker.get_order(order.id).await.unwrap().rider_id.is_none());
    }

    #[tokio::test]
    async fn second_accept_reports_existing_rider() {
        let tracker = tracker();
        let first = rider(&tracker).await;
        let second = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;

        tracker.accept_order(first.id, order.id).await.unwrap();
        let err = tracker.accept_order(second.id, order.id).await.unwrap_err();

        assert_eq!(
            err,
            LifecycleError::AlreadyAssigned {
                order_id: order.id,
                rider_id: first.id,
            }
        );
        let second = tracker.get_rider(second.id).await.unwrap();
        assert!(second.current_order_ids.is_empty());
    }

    #[tokio::test]
    async fn complete_delivery_checks_rider_then_status() {
        let tracker = tracker();
        let assigned = rider(&tracker).await;
        let stranger = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(assigned.id, order.id).await.unwrap();

        assert!(matches!(
            tracker.complete_delivery(stranger.id, order.id).await,
            Err(LifecycleError::Unauthorized { .. })
        ));
        assert_eq!(
            tracker
                .complete_delivery(assigned.id, order.id)
                .await
                .unwrap_err(),
            LifecycleError::InvalidTransition {
                from: OrderStatus::ReadyForPickup,
                to: OrderStatus::Delivered,
            }
        );
    }

    #[tokio::test]
    async fn complete_delivery_credits_fee_and_releases_rider() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();
        tracker
            .advance_status(order.id, OrderStatus::OutForDelivery)
            .await
            .unwrap();

        let delivered = tracker.complete_delivery(rider.id, order.id).await.unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.delivery_fee, Some(5.0));

        let rider = tracker.get_rider(rider.id).await.unwrap();
        assert_eq!(rider.earnings_total, 5.0);
        assert_eq!(rider.completed_deliveries, 1);
        assert!(rider.current_order_ids.is_empty());
        assert_eq!(tracker.metrics().active_deliveries.get(), 0);
    }

    #[tokio::test]
    async fn delivering_through_advance_status_settles_the_rider_too() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();
        tracker
            .advance_status(order.id, OrderStatus::OutForDelivery)
            .await
            .unwrap();
        tracker
            .advance_status(order.id, OrderStatus::Delivered)
            .await
            .unwrap();

        let rider = tracker.get_rider(rider.id).await.unwrap();
        assert_eq!(rider.earnings_total, 5.0);
        assert!(rider.current_order_ids.is_empty());
    }

    #[tokio::test]
    async fn cancel_releases_rider_without_credit() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();

        let receipt = tracker
            .cancel_order(order.id, "  restaurant closed ")
            .await
            .unwrap();
        assert_eq!(receipt.order.status, OrderStatus::Cancelled);
        assert_eq!(
            receipt.order.cancellation_reason.as_deref(),
            Some("restaurant closed")
        );
        assert_eq!(receipt.refund.percentage, 50);
        assert_eq!(receipt.refund.amount, 12.5);

        let rider = tracker.get_rider(rider.id).await.unwrap();
        assert!(rider.current_order_ids.is_empty());
        assert_eq!(rider.earnings_total, 0.0);
    }

    #[tokio::test]
    async fn refund_quote_follows_the_status_cancelled_from() {
        let tracker = tracker();
        for (status, percentage) in [
            (OrderStatus::Placed, 100),
            (OrderStatus::Confirmed, 100),
            (OrderStatus::Preparing, 80),
            (OrderStatus::ReadyForPickup, 50),
        ] {
            let order = order_at(&tracker, status).await;
            let receipt = tracker.cancel_order(order.id, "changed mind").await.unwrap();
            assert_eq!(receipt.refund.percentage, percentage, "{status}");
            assert_eq!(
                receipt.refund.amount,
                25.0 * f64::from(percentage) / 100.0,
                "{status}"
            );
        }
    }

    #[tokio::test]
    async fn settling_an_order_the_rider_no_longer_holds_pays_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = LifecycleTracker::new(
            store.clone(),
            Arc::new(FlatPricing(5.0)),
            16,
            Metrics::new(),
        );
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();
        tracker
            .advance_status(order.id, OrderStatus::OutForDelivery)
            .await
            .unwrap();

        let mut detached = tracker.get_rider(rider.id).await.unwrap();
        detached.current_order_ids.clear();
        store.save_rider(detached).await.unwrap();

        let delivered = tracker.complete_delivery(rider.id, order.id).await.unwrap();
        assert_eq!(delivered.delivery_fee, Some(5.0));

        let rider = tracker.get_rider(rider.id).await.unwrap();
        assert_eq!(rider.earnings_total, 0.0);
        assert_eq!(rider.completed_deliveries, 0);
    }

    #[tokio::test]
    async fn terminal_orders_reject_every_mutation() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::Preparing).await;
        tracker.cancel_order(order.id, "customer request").await.unwrap();

        let terminal = |result: Result<_, LifecycleError>| {
            matches!(result, Err(LifecycleError::TerminalStateViolation { .. }))
        };
        assert!(terminal(
            tracker
                .advance_status(order.id, OrderStatus::ReadyForPickup)
                .await
                .map(|_| ())
        ));
        assert!(terminal(
            tracker
                .cancel_order(order.id, "again")
                .await
                .map(|_| ())
        ));
        assert!(terminal(
            tracker.accept_order(rider.id, order.id).await.map(|_| ())
        ));
        assert!(terminal(
            tracker
                .record_location(rider.id, order.id, PICKUP)
                .await
                .map(|_| ())
        ));
        assert!(terminal(
            tracker
                .complete_delivery(rider.id, order.id)
                .await
                .map(|_| ())
        ));
    }

    #[tokio::test]
    async fn location_pings_keep_status_and_extend_history() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();
        tracker
            .advance_status(order.id, OrderStatus::OutForDelivery)
            .await
            .unwrap();

        let ping = tracker
            .record_location(rider.id, order.id, DROPOFF)
            .await
            .unwrap();
        assert_eq!(ping.status, OrderStatus::OutForDelivery);
        assert_eq!(ping.location, Some(DROPOFF));
        assert_eq!(ping.rider_id, Some(rider.id));

        let history = tracker.get_history(order.id).await.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.last().unwrap().id, ping.id);
        assert_eq!(
            tracker.get_order(order.id).await.unwrap().status,
            OrderStatus::OutForDelivery
        );
        assert_eq!(
            tracker.get_rider(rider.id).await.unwrap().location,
            Some(DROPOFF)
        );
    }

    #[tokio::test]
    async fn location_from_unassigned_rider_is_unauthorized() {
        let tracker = tracker();
        let stranger = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;

        let err = tracker
            .record_location(stranger.id, order.id, PICKUP)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Unauthorized {
                rider_id: stranger.id,
                order_id: order.id,
            }
        );
    }

    #[tokio::test]
    async fn standalone_location_update_moves_the_rider_only() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();

        let moved = tracker.update_location(rider.id, DROPOFF).await.unwrap();
        assert_eq!(moved.location, Some(DROPOFF));
        assert_eq!(
            tracker.get_rider(rider.id).await.unwrap().location,
            Some(DROPOFF)
        );
        assert_eq!(tracker.get_history(order.id).await.unwrap().len(), 3);

        let off_map = GeoPoint {
            lat: 95.0,
            lng: 0.0,
        };
        assert!(matches!(
            tracker.update_location(rider.id, off_map).await,
            Err(LifecycleError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            tracker.update_location(Uuid::new_v4(), DROPOFF).await,
            Err(LifecycleError::RiderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rating_only_once_after_delivery() {
        let tracker = tracker();
        let order = order_at(&tracker, OrderStatus::OutForDelivery).await;

        assert!(matches!(
            tracker.rate_order(order.id, 5).await,
            Err(LifecycleError::NotEligible { .. })
        ));

        tracker
            .advance_status(order.id, OrderStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(
            tracker.rate_order(order.id, 0).await.unwrap_err(),
            LifecycleError::InvalidRating(0)
        );
        assert_eq!(
            tracker.rate_order(order.id, 300).await.unwrap_err(),
            LifecycleError::InvalidRating(300)
        );
        assert_eq!(
            tracker.rate_order(order.id, -1).await.unwrap_err(),
            LifecycleError::InvalidRating(-1)
        );
        assert_eq!(
            tracker.rate_order(order.id, 4).await.unwrap().rating,
            Some(4)
        );
        assert_eq!(
            tracker.rate_order(order.id, 5).await.unwrap_err(),
            LifecycleError::AlreadyRated(order.id)
        );
    }

    #[tokio::test]
    async fn rider_with_active_delivery_cannot_go_offline() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let order = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, order.id).await.unwrap();

        assert_eq!(
            tracker
                .set_availability(rider.id, false, None)
                .await
                .unwrap_err(),
            LifecycleError::RiderBusy {
                rider_id: rider.id,
                active: 1,
            }
        );
    }

    #[tokio::test]
    async fn available_orders_are_nearest_first_and_unassigned() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let other = tracker.register_rider("Otto", Some(PICKUP)).await.unwrap();

        let near = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        let farther = {
            let order = tracker
                .place_order(GeoPoint { lat: 52.55, lng: 13.45 }, DROPOFF, 18.0)
                .await
                .unwrap();
            for status in [
                OrderStatus::Confirmed,
                OrderStatus::Preparing,
                OrderStatus::ReadyForPickup,
            ] {
                tracker.advance_status(order.id, status).await.unwrap();
            }
            order
        };
        let taken = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(other.id, taken.id).await.unwrap();
        order_at(&tracker, OrderStatus::Preparing).await;
        let out_of_range = tracker
            .place_order(GeoPoint { lat: 53.55, lng: 9.99 }, DROPOFF, 18.0)
            .await
            .unwrap();

        let listed = tracker.available_orders(rider.id, 15.0, 10).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|entry| entry.order.id).collect();

        assert_eq!(ids, vec![near.id, farther.id]);
        assert!(!ids.contains(&out_of_range.id));
        assert!(listed[0].distance_km <= listed[1].distance_km);
        assert_eq!(listed[0].estimated_fee, 5.0);

        let limited = tracker.available_orders(rider.id, 15.0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn current_deliveries_follow_assignment() {
        let tracker = tracker();
        let rider = rider(&tracker).await;
        let first = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        let second = order_at(&tracker, OrderStatus::ReadyForPickup).await;
        tracker.accept_order(rider.id, first.id).await.unwrap();
        tracker.accept_order(rider.id, second.id).await.unwrap();
        tracker.cancel_order(first.id, "vendor issue").await.unwrap();

        let active = tracker.current_deliveries(rider.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn subscribers_see_appended_events() {
        let tracker = tracker();
        let mut rx = tracker.subscribe();
        let order = tracker.place_order(PICKUP, DROPOFF, 25.0).await.unwrap();

        tracker
            .advance_status(order.id, OrderStatus::Confirmed)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.status, OrderStatus::Confirmed);
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_touching_the_store() {
        let tracker = tracker();

        assert!(matches!(
            tracker
                .place_order(GeoPoint { lat: 120.0, lng: 0.0 }, DROPOFF, 10.0)
                .await,
            Err(LifecycleError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            tracker.place_order(PICKUP, DROPOFF, -1.0).await,
            Err(LifecycleError::Validation(_))
        ));
        assert!(matches!(
            tracker.register_rider("   ", None).await,
            Err(LifecycleError::Validation(_))
        ));
    }
}
