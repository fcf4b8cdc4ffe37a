//! Broadcast distribution points: [`MessageBus`] and [`MessageFan`].

use std::sync::{Arc, Mutex};

use crate::fabric::{next_subscriber_id, MessageConsumer, MessageProvider, SubscriberId};

type Registry<M> = Mutex<Vec<(SubscriberId, Arc<dyn MessageConsumer<M>>)>>;

fn snapshot<M>(registry: &Registry<M>) -> Vec<Arc<dyn MessageConsumer<M>>> {
    registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(_, c)| Arc::clone(c))
        .collect()
}

fn attach_to<M>(registry: &Registry<M>, consumer: Arc<dyn MessageConsumer<M>>) -> SubscriberId {
    let id = next_subscriber_id();
    registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((id, consumer));
    id
}

fn detach_from<M>(registry: &Registry<M>, id: SubscriberId) {
    registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .retain(|(sid, _)| *sid != id);
}

/// Broadcast point: every attached consumer gets its own clone.
///
/// `push` takes a consumer snapshot under the lock and delivers outside it,
/// so a slow consumer never blocks registration. Per-consumer ordering is
/// preserved; cross-consumer ordering is not guaranteed.
pub struct MessageBus<M> {
    consumers: Registry<M>,
}

impl<M: Clone> Default for MessageBus<M> {
    fn default() -> Self {
        MessageBus::new()
    }
}

impl<M: Clone> MessageBus<M> {
    /// Bus with no consumers.
    #[must_use]
    pub fn new() -> Self {
        MessageBus {
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Broadcast `msg`; returns `true` if at least one consumer accepted.
    pub fn push(&self, msg: &M) -> bool {
        let mut accepted = false;
        for consumer in snapshot(&self.consumers) {
            if consumer.push(msg.clone()) {
                accepted = true;
            }
        }
        accepted
    }

    /// Number of attached consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<M: Clone + Send + Sync> MessageProvider<M> for MessageBus<M> {
    fn attach(&self, consumer: Arc<dyn MessageConsumer<M>>) -> SubscriberId {
        attach_to(&self.consumers, consumer)
    }

    fn detach(&self, id: SubscriberId) {
        detach_from(&self.consumers, id);
    }
}

impl<M: Clone + Send + Sync> MessageConsumer<M> for MessageBus<M> {
    fn push(&self, msg: M) -> bool {
        MessageBus::push(self, &msg)
    }
}

/// Barrier-style distribution: reports success only when *every* consumer
/// accepted the message.
///
/// Delivery still reaches each consumer (clones cannot be recalled); the
/// all-accepted report is what distinguishes the fan from the bus. A fan
/// with no consumers rejects every message.
pub struct MessageFan<M> {
    consumers: Registry<M>,
}

impl<M: Clone> Default for MessageFan<M> {
    fn default() -> Self {
        MessageFan::new()
    }
}

impl<M: Clone> MessageFan<M> {
    /// Fan with no consumers.
    #[must_use]
    pub fn new() -> Self {
        MessageFan {
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Distribute `msg`; `true` only if every consumer accepted.
    pub fn push(&self, msg: &M) -> bool {
        let consumers = snapshot(&self.consumers);
        if consumers.is_empty() {
            return false;
        }
        let mut all_accepted = true;
        for consumer in consumers {
            if !consumer.push(msg.clone()) {
                all_accepted = false;
            }
        }
        all_accepted
    }
}

impl<M: Clone + Send + Sync> MessageProvider<M> for MessageFan<M> {
    fn attach(&self, consumer: Arc<dyn MessageConsumer<M>>) -> SubscriberId {
        attach_to(&self.consumers, consumer)
    }

    fn detach(&self, id: SubscriberId) {
        detach_from(&self.consumers, id);
    }
}

impl<M: Clone + Send + Sync> MessageConsumer<M> for MessageFan<M> {
    fn push(&self, msg: M) -> bool {
        MessageFan::push(self, &msg)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::MessageQueue;

    #[test]
    fn test_bus_without_consumers_rejects() {
        let bus: MessageBus<u32> = MessageBus::new();
        assert!(!bus.push(&1));
    }

    #[test]
    fn test_bus_clones_to_every_consumer() {
        let bus: MessageBus<String> = MessageBus::new();
        let q1 = Arc::new(MessageQueue::new());
        let q2 = Arc::new(MessageQueue::new());
        bus.attach(Arc::clone(&q1) as _);
        bus.attach(Arc::clone(&q2) as _);

        assert!(bus.push(&"msg".to_string()));
        assert_eq!(q1.len(), 1);
        assert_eq!(q2.len(), 1);
    }

    #[test]
    fn test_bus_accepts_if_any_consumer_accepts() {
        let bus: MessageBus<u32> = MessageBus::new();
        let full = Arc::new(MessageQueue::with_capacity(0));
        let open = Arc::new(MessageQueue::new());
        bus.attach(Arc::clone(&full) as _);
        bus.attach(Arc::clone(&open) as _);

        assert!(bus.push(&1));
        assert_eq!(open.len(), 1);
        assert_eq!(full.len(), 0);
    }

    #[test]
    fn test_detach_stops_delivery() {
        let bus: MessageBus<u32> = MessageBus::new();
        let q = Arc::new(MessageQueue::new());
        let id = bus.attach(Arc::clone(&q) as _);
        assert!(bus.push(&1));
        bus.detach(id);
        assert!(!bus.push(&2));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_fan_requires_every_consumer() {
        let fan: MessageFan<u32> = MessageFan::new();
        let full = Arc::new(MessageQueue::with_capacity(0));
        let open = Arc::new(MessageQueue::new());
        fan.attach(Arc::clone(&open) as _);
        assert!(fan.push(&1));

        fan.attach(Arc::clone(&full) as _);
        assert!(!fan.push(&2));
        // The accepting consumer still received its copy.
        assert_eq!(open.len(), 2);
    }

    #[test]
    fn test_fan_without_consumers_rejects() {
        let fan: MessageFan<u32> = MessageFan::new();
        assert!(!fan.push(&1));
    }
}
