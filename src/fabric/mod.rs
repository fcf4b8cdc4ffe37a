//! Message fabric: queues, buffers, buses, and the subscription glue.
//!
//! Messages flow from *providers* to *consumers*:
//!
//! ```text
//! provider (bus, broker output) ──Subscription──► consumer (queue, bus, sink)
//! ```
//!
//! A [`Subscription`] is the scoped binding between one provider and one
//! consumer: constructing it attaches, dropping it detaches. Duplication is
//! plain [`Clone`] — derive it for by-value message types, implement it
//! manually (e.g. via a `clone_boxed` method on a boxed trait object) where a
//! polymorphic clone is needed. A given fabric instance clones uniformly.

mod buffer;
mod bus;
mod queue;

pub use buffer::MessageBuffer;
pub use bus::{MessageBus, MessageFan};
pub use queue::{MessageQueue, DEFAULT_QUEUE_CAPACITY};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifies one attached consumer within a provider.
pub type SubscriberId = u64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_subscriber_id() -> SubscriberId {
    NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Capability to accept messages.
///
/// `push` returns `false` when the consumer rejects the message
/// (backpressure); the caller decides the policy.
pub trait MessageConsumer<M>: Send + Sync {
    /// Offer one owned message.
    fn push(&self, msg: M) -> bool;
}

/// Capability to bind consumers to a message source.
pub trait MessageProvider<M>: Send + Sync {
    /// Attach a consumer; it receives every subsequently provided message.
    fn attach(&self, consumer: Arc<dyn MessageConsumer<M>>) -> SubscriberId;

    /// Detach a previously attached consumer. Unknown IDs are ignored.
    fn detach(&self, id: SubscriberId);
}

/// Scoped provider→consumer binding.
///
/// Holds the provider weakly: dropping the subscription after the provider
/// is gone is a no-op, never a dangling unregister.
pub struct Subscription<M> {
    provider: Weak<dyn MessageProvider<M>>,
    id: SubscriberId,
}

impl<M> Subscription<M> {
    /// Bind `consumer` to `provider` for the lifetime of the returned value.
    pub fn new<P>(provider: &Arc<P>, consumer: Arc<dyn MessageConsumer<M>>) -> Self
    where
        P: MessageProvider<M> + 'static,
    {
        let provider: Arc<P> = Arc::clone(provider);
        let provider: Arc<dyn MessageProvider<M>> = provider;
        let id = provider.attach(consumer);
        Subscription {
            provider: Arc::downgrade(&provider),
            id,
        }
    }

    /// Bind through an already type-erased provider handle.
    pub fn from_dyn(provider: &Arc<dyn MessageProvider<M>>, consumer: Arc<dyn MessageConsumer<M>>) -> Self {
        let id = provider.attach(consumer);
        Subscription {
            provider: Arc::downgrade(provider),
            id,
        }
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.upgrade() {
            provider.detach(self.id);
        }
    }
}

/// A batch of subscriptions released together on drop.
///
/// The broker sender threads subscribe their input queue to every registered
/// provider for the duration of their run loop; this keeps those bindings in
/// one place.
#[derive(Default)]
pub struct SubscriptionSet<M> {
    subscriptions: Vec<Subscription<M>>,
}

impl<M> SubscriptionSet<M> {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        SubscriptionSet {
            subscriptions: Vec::new(),
        }
    }

    /// Add one binding to the set.
    pub fn add(&mut self, subscription: Subscription<M>) {
        self.subscriptions.push(subscription);
    }

    /// Number of held bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// True when no bindings are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
