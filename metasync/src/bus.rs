//! In-process publish/subscribe registry.
//!
//! Delivery is synchronous: `publish` runs every handler currently registered
//! for the event's topic, in subscription order, before it returns. There is no
//! buffering and no replay, so a handler registered after a publish never sees
//! that event. A handler that panics is logged and skipped; its siblings and the
//! publisher keep running.

use crate::common::SubscriptionId;
use crate::events::{MetaEvent, Topic};
use parking_lot::RwLock;
use slotmap::SlotMap;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// A callback registered on the bus.
pub type Handler = Arc<dyn Fn(&MetaEvent) + Send + Sync>;

struct Subscription {
    topic: Topic,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    subscriptions: SlotMap<SubscriptionId, Subscription>,
    // Insertion order per topic; the slotmap alone does not preserve it once keys are recycled.
    by_topic: HashMap<Topic, Vec<SubscriptionId>>,
}

/// The bus every other component talks through.
///
/// Shared by handle (`Arc<EventBus>`); there is exactly one per engine.
#[derive(Default)]
pub struct EventBus {
    registry: RwLock<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic` and returns the id needed to remove it.
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(&MetaEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut registry = self.registry.write();
        let id = registry.subscriptions.insert(Subscription {
            topic,
            handler: Arc::new(handler),
        });
        let ids = registry.by_topic.entry(topic).or_default();
        ids.push(id);
        trace!("Subscribed to {}, total subscribers: {}", topic, ids.len());
        id
    }

    /// Removes a handler. Returns `true` if it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        let Some(subscription) = registry.subscriptions.remove(id) else {
            return false;
        };
        if let Some(ids) = registry.by_topic.get_mut(&subscription.topic) {
            ids.retain(|existing| *existing != id);
            trace!(
                "Unsubscribed from {}, remaining subscribers: {}",
                subscription.topic,
                ids.len()
            );
        }
        true
    }

    /// Delivers `event` to every handler of its topic.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: MetaEvent) -> usize {
        let topic = event.topic();
        // Snapshot the handler list so handlers may (un)subscribe while we deliver.
        let handlers: Vec<Handler> = {
            let registry = self.registry.read();
            registry
                .by_topic
                .get(&topic)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| registry.subscriptions.get(*id))
                        .map(|subscription| subscription.handler.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        trace!("Publishing {} to {} handler(s)", topic, handlers.len());
        let mut delivered = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(cause) => {
                    let message = cause
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| cause.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Error in {} handler: {}", topic, message);
                }
            }
        }
        delivered
    }

    /// Number of handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .read()
            .by_topic
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        let mut registry = self.registry.write();
        registry.subscriptions.clear();
        registry.by_topic.clear();
        trace!("All subscriptions cleared");
    }
}
