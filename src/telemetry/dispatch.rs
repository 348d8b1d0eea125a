//! Span helpers for event processing and per-automation delivery.

use tracing::Span;

use crate::engine::Match;
use crate::model::Event;

/// Span covering match + dispatch of one event.
pub fn start_event_span(event: &Event) -> Span {
    tracing::info_span!(
        "automation.event",
        "event.id" = %event.id(),
        "event.kind" = event.kind().as_str(),
        "tenant.id" = %event.tenant_id(),
        "review.id" = %event.review_id(),
    )
}

/// Span covering one (automation, event) dispatch. The outcome field is
/// filled by [`record_outcome`].
pub fn start_delivery_span(m: &Match) -> Span {
    tracing::info_span!(
        "automation.deliver",
        "automation.id" = %m.automation.id,
        "automation.action_type" = m.automation.action_type().as_str(),
        "review.id" = %m.event.review_id(),
        "delivery.outcome" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("delivery.outcome", outcome);
}
