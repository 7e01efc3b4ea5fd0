//! Subscription bookkeeping and topic filter matching.
//!
//! The session keeps every local subscription in a [`SubscriptionTable`],
//! together with a per-topic reference count. The counts decide when the
//! broker needs to hear about anything: the first subscription for a topic
//! pattern triggers a broker SUBSCRIBE, the last removal triggers a broker
//! UNSUBSCRIBE, and everything in between is purely local.
//!
//! Filter matching follows MQTT semantics: `+` matches one level, `#`
//! matches the remainder, and topics starting with `$` are never matched by
//! a filter whose first level is a wildcard.

use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked for each message delivered to a subscription.
///
/// Arguments are the concrete topic the message arrived on and its payload.
/// Called on the transport's event thread; must not block.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Identifier for one local subscription within a session.
pub type SubscriptionId = u64;

struct SubscriptionEntry {
    topic: String,
    callback: MessageCallback,
}

/// Local subscriptions plus per-topic reference counts.
///
/// Not internally synchronized: the session owns one behind its state lock
/// and mutates entries and counts together.
#[derive(Default)]
pub struct SubscriptionTable {
    next_id: SubscriptionId,
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    refcounts: HashMap<String, usize>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription and bumps the topic's count.
    ///
    /// Returns the new id and whether this was the first subscription for
    /// the topic (count went 0 -> 1), in which case the caller owes the
    /// broker a SUBSCRIBE.
    pub fn insert(&mut self, topic: &str, callback: MessageCallback) -> (SubscriptionId, bool) {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(
            id,
            SubscriptionEntry {
                topic: topic.to_string(),
                callback,
            },
        );
        let count = self.refcounts.entry(topic.to_string()).or_insert(0);
        *count += 1;
        (id, *count == 1)
    }

    /// Removes a subscription and drops the topic's count.
    ///
    /// Returns the topic and whether this was the last subscription for it
    /// (count went 1 -> 0), in which case the caller owes the broker an
    /// UNSUBSCRIBE. Removing an unknown id returns `None`.
    ///
    /// Also the rollback path when a broker SUBSCRIBE fails: the entry and
    /// its count contribution disappear together, so a later subscriber
    /// starts again from zero.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<(String, bool)> {
        let entry = self.entries.remove(&id)?;
        let last = match self.refcounts.get_mut(&entry.topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.refcounts.remove(&entry.topic);
                true
            }
            None => false,
        };
        Some((entry.topic, last))
    }

    /// Topics that currently have at least one subscriber. This is the set
    /// to re-establish with the broker after a reconnect.
    pub fn active_topics(&self) -> Vec<String> {
        self.refcounts.keys().cloned().collect()
    }

    /// Callbacks whose filter matches `topic`, one per live subscription.
    pub fn matching_callbacks(&self, topic: &str) -> Vec<MessageCallback> {
        self.entries
            .values()
            .filter(|e| topic_matches_filter(topic, &e.topic))
            .map(|e| Arc::clone(&e.callback))
            .collect()
    }

    /// Current subscriber count for an exact topic pattern.
    pub fn refcount(&self, topic: &str) -> usize {
        self.refcounts.get(topic).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks whether a concrete `topic` matches a subscription `filter`.
///
/// - `+` matches exactly one level
/// - `#` matches the remaining levels, including none ("sport/#" matches
///   "sport" itself)
/// - a filter starting with a wildcard never matches a `$`-prefixed topic
///   (MQTT-4.7.2-1)
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();

    loop {
        let filter_level = match filter_levels.next() {
            Some(level) => level,
            // Filter consumed: match only if the topic is too.
            None => return topic_levels.next().is_none(),
        };

        if filter_level == "#" {
            // Valid filters end at '#'; it swallows the rest of the topic.
            return filter_levels.peek().is_none();
        }

        match topic_levels.next() {
            Some(topic_level) if filter_level == "+" || filter_level == topic_level => {}
            Some(_) => return false,
            // Topic ran out with non-wildcard filter levels remaining.
            // (A trailing '#' was already handled above, which is what
            // lets "sport/#" match "sport" itself.)
            None => return false,
        }
    }
}
