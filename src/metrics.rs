//! Prometheus counters for the order-finalization flow.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static CHECKOUT_SESSIONS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register(IntCounter::new(
        "storefront_checkout_sessions_created_total",
        "Hosted checkout sessions created",
    ))
});

pub static WEBHOOK_EVENTS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register(IntCounter::new(
        "storefront_webhook_events_received_total",
        "Payment webhook events received",
    ))
});

pub static WEBHOOK_SIGNATURE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register(IntCounter::new(
        "storefront_webhook_signature_failures_total",
        "Webhook deliveries rejected for a bad signature",
    ))
});

pub static ORDERS_FINALIZED: Lazy<IntCounter> = Lazy::new(|| {
    register(IntCounter::new(
        "storefront_orders_finalized_total",
        "Orders created by the finalizer",
    ))
});

pub static DUPLICATE_FINALIZATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register(IntCounter::new(
        "storefront_duplicate_finalizations_total",
        "Finalization attempts that found an existing order for the payment reference",
    ))
});

fn register(counter: Result<IntCounter, prometheus::Error>) -> IntCounter {
    let counter = counter.expect("valid counter definition");
    // Double registration only happens if a Lazy is re-created, which it is not.
    let _ = REGISTRY.register(Box::new(counter.clone()));
    counter
}

/// Renders the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
