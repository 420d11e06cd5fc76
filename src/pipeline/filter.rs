//! Item filter: drops extraction artifacts before anything reaches a sink.

use tracing::debug;

use crate::pipeline::types::Item;

/// Name prefix the oracle uses to signal an invalid extraction.
pub const INVALID_ITEM_PREFIX: &str = "Wrong Request";

/// Whether an item name must never reach a sink.
pub fn is_rejected_name(name: &str) -> bool {
    let name = name.trim_start();
    name.is_empty() || name.starts_with(INVALID_ITEM_PREFIX)
}

/// Drop unnamed and sentinel items, preserving order.
///
/// Idempotent: a second pass over its own output drops nothing.
pub fn filter_items(items: Vec<Item>) -> Vec<Item> {
    let before = items.len();
    let kept: Vec<Item> = items
        .into_iter()
        .filter(|item| !is_rejected_name(&item.name))
        .collect();

    if kept.len() != before {
        debug!(dropped = before - kept.len(), kept = kept.len(), "Filtered invalid items");
    }
    kept
}
