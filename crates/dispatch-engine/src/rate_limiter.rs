//! Per-chat rate limiting of a dispatch batch.
//!
//! Messages are grouped by `chat_id`, each group is ordered by `due_at`
//! (ties by insertion `sequence`) and the first `ceiling(class)` messages of
//! a group are selected. Everything else is deferred. Groups never affect
//! each other and the global per-tick cap is enforced by the caller.

use relay_core::ChatClass;
use relay_database::OutboundMessage;
use std::collections::HashMap;

/// Result of rate limiting a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub selected: Vec<OutboundMessage>,
    pub deferred: Vec<OutboundMessage>,
}

/// Per-tick ceiling for a chat class. A class without an entry is treated as
/// ceiling zero.
fn ceiling_of(ceilings: &HashMap<ChatClass, u32>, class: ChatClass) -> usize {
    ceilings.get(&class).copied().unwrap_or(0) as usize
}

/// Partition `batch` into selected and deferred messages.
pub fn partition(batch: &[OutboundMessage], ceilings: &HashMap<ChatClass, u32>) -> Partition {
    partition_with_usage(batch, ceilings, &HashMap::new())
}

/// Partition `batch`, counting `usage[chat_id]` messages as already selected
/// for that chat earlier in the same tick.
///
/// A chat whose messages carry different classes gets the smallest of their
/// ceilings.
pub fn partition_with_usage(
    batch: &[OutboundMessage],
    ceilings: &HashMap<ChatClass, u32>,
    usage: &HashMap<String, u32>,
) -> Partition {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&OutboundMessage>> = HashMap::new();

    for message in batch {
        groups
            .entry(message.chat_id.as_str())
            .or_insert_with(|| {
                order.push(message.chat_id.as_str());
                Vec::new()
            })
            .push(message);
    }

    let mut result = Partition::default();

    for chat_id in order {
        let Some(mut group) = groups.remove(chat_id) else {
            continue;
        };
        group.sort_by_key(|m| (m.due_at, m.sequence));

        let ceiling = group
            .iter()
            .map(|m| ceiling_of(ceilings, m.chat_class))
            .min()
            .unwrap_or(0);
        let used = usage.get(chat_id).copied().unwrap_or(0) as usize;
        let allowance = ceiling.saturating_sub(used);

        for (rank, message) in group.into_iter().enumerate() {
            if rank < allowance {
                result.selected.push(message.clone());
            } else {
                result.deferred.push(message.clone());
            }
        }
    }

    result
}
