//! Bounded, thread-safe message queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::clock::Timestamp;
use crate::fabric::{MessageBuffer, MessageConsumer};
use crate::sync::WaitCondition;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded FIFO of owned messages.
///
/// `push` rejects at capacity; `pop`/`pop_all` block up to an absolute
/// deadline. Any number of producers and consumers may share the queue.
pub struct MessageQueue<M> {
    capacity: usize,
    cond: WaitCondition,
    queue: Mutex<VecDeque<M>>,
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        MessageQueue::new()
    }
}

impl<M> MessageQueue<M> {
    /// Queue with [`DEFAULT_QUEUE_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        MessageQueue::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Queue with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        MessageQueue {
            capacity,
            cond: WaitCondition::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, VecDeque<M>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue one message. Returns `false` at capacity.
    pub fn push(&self, msg: M) -> bool {
        {
            let mut queue = self.locked();
            if queue.len() >= self.capacity {
                log::warn!("[Queue] message queue overflow has been detected");
                return false;
            }
            queue.push_back(msg);
        }
        // Signal under the wait mutex so a popper between its emptiness
        // check and its wait cannot miss the wakeup.
        let _guard = self.cond.lock();
        self.cond.wake_all();
        true
    }

    /// Dequeue one message, blocking until `limit`.
    pub fn pop(&self, limit: Timestamp) -> Option<M> {
        loop {
            if let Some(msg) = self.locked().pop_front() {
                return Some(msg);
            }
            let guard = self.cond.lock();
            if !self.locked().is_empty() {
                continue;
            }
            let (_guard, signalled) = self.cond.wait_until(guard, limit);
            if !signalled && self.locked().is_empty() {
                return None;
            }
        }
    }

    /// Drain every queued message into `buffer`, blocking until at least one
    /// message is available or `limit` expires. Returns the drained count.
    pub fn pop_all(&self, buffer: &mut MessageBuffer<M>, limit: Timestamp) -> usize {
        loop {
            {
                let mut queue = self.locked();
                if !queue.is_empty() {
                    let count = queue.len();
                    buffer.extend(queue.drain(..));
                    return count;
                }
            }
            let guard = self.cond.lock();
            if !self.locked().is_empty() {
                continue;
            }
            let (_guard, signalled) = self.cond.wait_until(guard, limit);
            if !signalled && self.locked().is_empty() {
                return 0;
            }
        }
    }

    /// Number of queued messages (`≤ capacity` at every observation).
    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all queued messages.
    pub fn clear(&self) {
        self.locked().clear();
    }
}

impl<M: Send> MessageConsumer<M> for MessageQueue<M> {
    fn push(&self, msg: M) -> bool {
        MessageQueue::push(self, msg)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeout;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_overflow_at_capacity() {
        let q = MessageQueue::with_capacity(2);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.len(), 2);
        // Popping frees a slot.
        assert_eq!(q.pop(Timestamp::now()), Some(1));
        assert!(q.push(4));
    }

    #[test]
    fn test_pop_preserves_fifo_order() {
        let q = MessageQueue::new();
        for i in 0..5 {
            assert!(q.push(i));
        }
        for i in 0..5 {
            assert_eq!(q.pop(Timestamp::now()), Some(i));
        }
        assert_eq!(q.pop(Timestamp::now()), None);
    }

    #[test]
    fn test_pop_times_out_on_empty_queue() {
        let q: MessageQueue<u32> = MessageQueue::new();
        let limit = Timestamp::limit(Timeout::from_millis(20));
        assert_eq!(q.pop(limit), None);
        assert!(limit.expired());
    }

    #[test]
    fn test_pop_wakes_on_cross_thread_push() {
        let q = Arc::new(MessageQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                assert!(q.push(99u32));
            })
        };
        let msg = q.pop(Timestamp::limit(Timeout::new(5, 0)));
        assert_eq!(msg, Some(99));
        producer.join().expect("producer");
    }

    #[test]
    fn test_pop_all_drains_into_buffer() {
        let q = MessageQueue::new();
        let mut buffer = MessageBuffer::new();
        for i in 0..4 {
            assert!(q.push(i));
        }
        let drained = q.pop_all(&mut buffer, Timestamp::now());
        assert_eq!(drained, 4);
        assert!(q.is_empty());
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.pop(), Some(0));
    }

    #[test]
    fn test_pop_all_times_out_empty() {
        let q: MessageQueue<u32> = MessageQueue::new();
        let mut buffer = MessageBuffer::new();
        let drained = q.pop_all(&mut buffer, Timestamp::limit(Timeout::from_millis(20)));
        assert_eq!(drained, 0);
        assert!(buffer.is_empty());
    }
}
