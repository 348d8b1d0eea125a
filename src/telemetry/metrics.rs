//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"review-automation"` meter; without an
//! OTLP endpoint they are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::model::EventKind;

fn meter() -> Meter {
    opentelemetry::global::meter("review-automation")
}

/// Counter: events put on the queue.
/// Labels: `event_kind`, `source` ("ingest" | "scanner" | "retry").
pub fn events_published() -> Counter<u64> {
    meter()
        .u64_counter("automation.events.published")
        .with_description("Events published to the engine queue")
        .build()
}

/// Producer of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSource {
    Ingest,
    Scanner,
    Retry,
}

impl PublishSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishSource::Ingest => "ingest",
            PublishSource::Scanner => "scanner",
            PublishSource::Retry => "retry",
        }
    }
}

pub fn published_attributes(kind: EventKind, source: PublishSource) -> [KeyValue; 2] {
    [
        KeyValue::new("event_kind", kind.as_str()),
        KeyValue::new("source", source.as_str()),
    ]
}

/// Count `count` events of one kind published by `source`.
pub fn record_published(kind: EventKind, source: PublishSource, count: u64) {
    events_published().add(count, &published_attributes(kind, source));
}

/// Counter: events taken off the queue and settled.
/// Labels: `event_kind`, `result` ("ok" | "error").
pub fn events_processed() -> Counter<u64> {
    meter()
        .u64_counter("automation.events.processed")
        .with_description("Events matched and dispatched")
        .build()
}

/// Counter: (automation, event) pairs that satisfied their conditions.
/// Labels: `event_kind`.
pub fn automations_matched() -> Counter<u64> {
    meter()
        .u64_counter("automation.rules.matched")
        .with_description("Automations matched by events")
        .build()
}

/// Counter: dispatch results.
/// Labels: `action_type`, `outcome` ("success" | "failed" | "skipped" | "duplicate").
pub fn deliveries() -> Counter<u64> {
    meter()
        .u64_counter("automation.deliveries")
        .with_description("Action dispatch outcomes")
        .build()
}

/// Histogram: executor wall time in milliseconds.
/// Labels: `action_type`.
pub fn action_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("automation.action.duration_ms")
        .with_description("Action executor duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: per-tenant automation cache lookups.
/// Labels: `result` ("hit" | "miss").
pub fn rule_cache_lookups() -> Counter<u64> {
    meter()
        .u64_counter("automation.rules.cache_lookups")
        .with_description("Tenant automation cache lookups")
        .build()
}

/// Counter: automation rows skipped at load because they failed validation.
pub fn invalid_automations() -> Counter<u64> {
    meter()
        .u64_counter("automation.rules.invalid")
        .with_description("Automation rows quarantined at load")
        .build()
}

/// Counter: pgmq operations.
/// Labels: `queue`, `operation` ("create" | "send" | "read" | "read_empty" | "archive" | "set_vt").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("automation.queue.operations")
        .with_description("pgmq queue operations")
        .build()
}
