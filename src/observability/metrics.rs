use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub operations_total: IntCounterVec,
    pub operation_latency_seconds: HistogramVec,
    pub tracking_events_total: IntCounter,
    pub active_deliveries: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status changes by target status"),
            &["to_status"],
        )
        .expect("valid order_transitions_total metric");

        let operations_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_operations_total",
                "Lifecycle operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid lifecycle_operations_total metric");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lifecycle_operation_latency_seconds",
                "Latency of lifecycle operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid lifecycle_operation_latency_seconds metric");

        let tracking_events_total =
            IntCounter::new("tracking_events_total", "Tracking events appended")
                .expect("valid tracking_events_total metric");

        let active_deliveries = IntGauge::new(
            "active_deliveries",
            "Orders currently assigned to a rider and not yet finished",
        )
        .expect("valid active_deliveries metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(operations_total.clone()))
            .expect("register lifecycle_operations_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register lifecycle_operation_latency_seconds");
        registry
            .register(Box::new(tracking_events_total.clone()))
            .expect("register tracking_events_total");
        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");

        Self {
            registry,
            transitions_total,
            operations_total,
            operation_latency_seconds,
            tracking_events_total,
            active_deliveries,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
