//! Span helpers for item processing.

use crate::model::ItemId;
use tracing::Span;

/// Start a span covering one claimed item from handler call to delete or
/// release. `item.result` is filled in by [`record_result`].
pub fn start_item_span(queue: &str, id: ItemId, claims: u32) -> Span {
    tracing::info_span!(
        "queue.item",
        "queue.name" = queue,
        "item.id" = id.0,
        "item.claims" = claims,
        "item.result" = tracing::field::Empty,
    )
}

/// Record how the item left the handler.
pub fn record_result(span: &Span, result: &str) {
    span.record("item.result", result);
    span.in_scope(|| {
        tracing::debug!(result, "item finished");
    });
}
