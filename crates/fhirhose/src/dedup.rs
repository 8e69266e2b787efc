use crate::message::StreamMessage;

use std::collections::HashSet;

/// Keeps the first message per identifier, preserving order.
#[must_use]
pub fn deduplicate_identifiers(messages: Vec<StreamMessage>) -> Vec<StreamMessage> {
    let mut seen = HashSet::with_capacity(messages.len());

    messages
        .into_iter()
        .filter(|message| seen.insert(message.identifier.clone()))
        .collect()
}
