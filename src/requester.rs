//! Inter-thread request/response channel.
//!
//! One mutex + one condition variable buy a bounded FIFO request queue and a
//! response map keyed by request ID. Exactly one thread should act as the
//! *requester* (sends requests, awaits responses) and exactly one as the
//! *respondent* (fetches requests, sends responses); the type does not
//! enforce that split, it documents it — the same contract the subsystem
//! threads rely on.
//!
//! ```text
//! requester thread                      respondent thread
//!   id = send_request(msg) ──queue──►     pending = await_request(limit)
//!   await_response(id, limit) ◄──map──    send_response(&mut pending, msg)
//! ```
//!
//! Request IDs are positive and monotonically increasing, wrapping back to 1;
//! `0` is the overflow sentinel. Dropping a [`PendingRequest`] that still
//! required a response logs a warning — the requester's await will simply
//! time out.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::clock::Timestamp;
use crate::sync::WaitCondition;

/// Default capacity of the request queue and the response map.
pub const DEFAULT_REQUESTER_CAPACITY: usize = 16;

/// Request identifier; `0` means "none" (overflow).
pub type RequestId = usize;

/// Control messages understood by the toolkit's own threads.
///
/// A closed set: the oscillator/scheduler run loops and the broker thread
/// pairs speak exactly this protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMessage {
    /// Ask the respondent thread to stop after the current iteration.
    TerminationRequest,
    /// Liveness probe.
    PingRequest,
    /// A peer connection was established (listening broker pair).
    ConnectRequest,
    /// The peer connection was lost (listening broker pair).
    DisconnectRequest,
    /// Positive acknowledgement.
    OkResponse,
    /// Answer to [`ThreadMessage::PingRequest`].
    PongResponse,
}

struct QueueItem<M> {
    id: RequestId,
    request: M,
    response_required: bool,
}

struct Inner<M> {
    last_id: RequestId,
    requests: VecDeque<QueueItem<M>>,
    responses: HashMap<RequestId, M>,
}

/// A request handed to the respondent thread.
///
/// Owns the request payload. If the requester expects a response, answer via
/// [`InterThreadRequester::send_response`] before dropping; dropping an
/// unanswered response-required request logs a warning and the requester's
/// await times out.
#[derive(Debug)]
pub struct PendingRequest<M> {
    id: RequestId,
    request: M,
    response_required: bool,
    response_sent: bool,
}

impl<M> PendingRequest<M> {
    /// Request ID (always positive).
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The request payload.
    #[must_use]
    pub fn request(&self) -> &M {
        &self.request
    }

    /// True if the requester awaits a response to this request.
    #[must_use]
    pub fn response_required(&self) -> bool {
        self.response_required
    }

    /// True once a response has been sent.
    #[must_use]
    pub fn response_sent(&self) -> bool {
        self.response_sent
    }
}

impl<M> Drop for PendingRequest<M> {
    fn drop(&mut self) {
        if self.response_required && !self.response_sent {
            log::warn!(
                "[Requester] unanswered inter-thread request (id = {}) has been discarded",
                self.id
            );
        }
    }
}

/// Bounded request/response channel between two threads.
pub struct InterThreadRequester<M> {
    capacity: usize,
    cond: WaitCondition,
    inner: Mutex<Inner<M>>,
}

impl<M> Default for InterThreadRequester<M> {
    fn default() -> Self {
        InterThreadRequester::new()
    }
}

impl<M> InterThreadRequester<M> {
    /// Channel with the default capacity of 16.
    #[must_use]
    pub fn new() -> Self {
        InterThreadRequester::with_capacity(DEFAULT_REQUESTER_CAPACITY)
    }

    /// Channel with an explicit capacity (applies to the request queue and
    /// the response map alike).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        InterThreadRequester {
            capacity,
            cond: WaitCondition::new(),
            inner: Mutex::new(Inner {
                last_id: 0,
                requests: VecDeque::new(),
                responses: HashMap::new(),
            }),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Inner<M>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(inner: &mut Inner<M>) -> RequestId {
        inner.last_id = inner.last_id.wrapping_add(1);
        if inner.last_id == 0 {
            inner.last_id = 1;
        }
        inner.last_id
    }

    /// Fire-and-forget message to the respondent; no response is tracked.
    ///
    /// Returns `false` on queue overflow.
    pub fn send_message(&self, msg: M) -> bool {
        {
            let mut inner = self.locked();
            if inner.requests.len() >= self.capacity {
                log::warn!("[Requester] requests container overflow has been detected");
                return false;
            }
            let id = Self::next_id(&mut inner);
            inner.requests.push_back(QueueItem {
                id,
                request: msg,
                response_required: false,
            });
        }
        self.wake_waiters();
        true
    }

    /// Send a request the respondent must answer.
    ///
    /// Returns the positive request ID, or `0` on queue overflow.
    pub fn send_request(&self, request: M) -> RequestId {
        let id;
        {
            let mut inner = self.locked();
            if inner.requests.len() >= self.capacity {
                return 0;
            }
            id = Self::next_id(&mut inner);
            inner.requests.push_back(QueueItem {
                id,
                request,
                response_required: true,
            });
        }
        self.wake_waiters();
        id
    }

    /// Non-blocking fetch of the next pending request.
    pub fn fetch_request(&self) -> Option<PendingRequest<M>> {
        let item = self.locked().requests.pop_front()?;
        Some(PendingRequest {
            id: item.id,
            request: item.request,
            response_required: item.response_required,
            response_sent: false,
        })
    }

    /// Blocking fetch of the next pending request, bounded by `limit`.
    pub fn await_request(&self, limit: Timestamp) -> Option<PendingRequest<M>> {
        loop {
            if let Some(pending) = self.fetch_request() {
                return Some(pending);
            }
            let guard = self.cond.lock();
            // Re-check under the wait lock: a producer may have pushed and
            // signalled between the fetch and the lock.
            if !self.locked().requests.is_empty() {
                continue;
            }
            let (_guard, signalled) = self.cond.wait_until(guard, limit);
            if !signalled && self.locked().requests.is_empty() {
                return None;
            }
        }
    }

    /// Answer the given pending request.
    ///
    /// Returns `false` (with an error log) if the request did not require a
    /// response, a response was already sent, or the response map is at
    /// capacity.
    pub fn send_response(&self, pending: &mut PendingRequest<M>, response: M) -> bool {
        if !pending.response_required {
            log::error!(
                "[Requester] requesting thread does not expect a response for request (id = {})",
                pending.id
            );
            return false;
        }
        if pending.response_sent {
            log::error!(
                "[Requester] response has been already sent for request (id = {})",
                pending.id
            );
            return false;
        }
        {
            let mut inner = self.locked();
            if inner.responses.len() >= self.capacity {
                log::error!("[Requester] responses container overflow has been detected");
                return false;
            }
            inner.responses.insert(pending.id, response);
        }
        pending.response_sent = true;
        self.wake_waiters();
        true
    }

    /// Signal under the wait mutex so a waiter between its predicate check
    /// and its wait cannot miss the wakeup.
    fn wake_waiters(&self) {
        let _guard = self.cond.lock();
        self.cond.wake_all();
    }

    /// Non-blocking fetch of the response for `id`.
    pub fn fetch_response(&self, id: RequestId) -> Option<M> {
        self.locked().responses.remove(&id)
    }

    /// Await the response for `id`, bounded by `limit`.
    pub fn await_response(&self, id: RequestId, limit: Timestamp) -> Option<M> {
        loop {
            if let Some(response) = self.fetch_response(id) {
                return Some(response);
            }
            let guard = self.cond.lock();
            if self.locked().responses.contains_key(&id) {
                continue;
            }
            let (_guard, signalled) = self.cond.wait_until(guard, limit);
            if !signalled && !self.locked().responses.contains_key(&id) {
                return None;
            }
        }
    }

    /// Await the response for `id` with no deadline. Teardown paths only.
    pub fn await_response_blocking(&self, id: RequestId) -> M {
        loop {
            if let Some(response) = self.fetch_response(id) {
                return response;
            }
            let guard = self.cond.lock();
            if self.locked().responses.contains_key(&id) {
                continue;
            }
            drop(self.cond.wait(guard));
        }
    }

    /// Drop all queued requests and responses.
    ///
    /// Exclusive access required (`&mut self`): reset is a teardown helper,
    /// not a concurrent operation.
    pub fn reset(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        inner.requests.clear();
        inner.responses.clear();
    }

    /// Number of queued, unfetched requests.
    #[must_use]
    pub fn queued_requests(&self) -> usize {
        self.locked().requests.len()
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
    fn test_ids_are_positive_and_increasing() {
        let r = InterThreadRequester::new();
        let a = r.send_request(ThreadMessage::PingRequest);
        let b = r.send_request(ThreadMessage::PingRequest);
        assert!(a > 0);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_requests_are_fifo() {
        let r = InterThreadRequester::with_capacity(4);
        assert!(r.send_message(1u32));
        assert!(r.send_message(2));
        assert!(r.send_message(3));
        assert_eq!(*r.fetch_request().expect("first").request(), 1);
        assert_eq!(*r.fetch_request().expect("second").request(), 2);
        assert_eq!(*r.fetch_request().expect("third").request(), 3);
        assert!(r.fetch_request().is_none());
    }

    #[test]
    fn test_overflow_returns_zero_id() {
        let r = InterThreadRequester::with_capacity(2);
        assert!(r.send_request(0u8) > 0);
        assert!(r.send_request(1) > 0);
        assert_eq!(r.send_request(2), 0);
        assert!(!r.send_message(3));
        // Draining frees capacity again.
        drop(r.fetch_request());
        assert!(r.send_request(4) > 0);
    }

    #[test]
    fn test_response_round_trip_across_threads() {
        let r = Arc::new(InterThreadRequester::<ThreadMessage>::new());
        let respondent = {
            let r = Arc::clone(&r);
            thread::spawn(move || {
                let mut pending = r
                    .await_request(Timestamp::limit(Timeout::new(5, 0)))
                    .expect("request before deadline");
                assert_eq!(*pending.request(), ThreadMessage::PingRequest);
                assert!(pending.response_required());
                assert!(r.send_response(&mut pending, ThreadMessage::PongResponse));
            })
        };

        let id = r.send_request(ThreadMessage::PingRequest);
        assert!(id > 0);
        let response = r.await_response(id, Timestamp::limit(Timeout::new(5, 0)));
        assert_eq!(response, Some(ThreadMessage::PongResponse));
        respondent.join().expect("respondent");
    }

    #[test]
    fn test_response_is_matched_by_id() {
        let r = InterThreadRequester::<u32>::new();
        let first = r.send_request(10);
        let second = r.send_request(20);

        let mut p1 = r.fetch_request().expect("first pending");
        let mut p2 = r.fetch_request().expect("second pending");
        // Answer out of order.
        assert!(r.send_response(&mut p2, 200));
        assert!(r.send_response(&mut p1, 100));

        assert_eq!(r.fetch_response(first), Some(100));
        assert_eq!(r.fetch_response(second), Some(200));
    }

    #[test]
    fn test_send_response_requires_response_flag() {
        let r = InterThreadRequester::<u32>::new();
        assert!(r.send_message(7));
        let mut pending = r.fetch_request().expect("pending");
        assert!(!pending.response_required());
        assert!(!r.send_response(&mut pending, 8));
    }

    #[test]
    fn test_double_response_rejected() {
        let r = InterThreadRequester::<u32>::new();
        let _id = r.send_request(1);
        let mut pending = r.fetch_request().expect("pending");
        assert!(r.send_response(&mut pending, 2));
        assert!(!r.send_response(&mut pending, 3));
    }

    #[test]
    fn test_await_request_times_out() {
        let r = InterThreadRequester::<u32>::new();
        let limit = Timestamp::limit(Timeout::from_millis(20));
        assert!(r.await_request(limit).is_none());
        assert!(limit.expired());
    }

    #[test]
    fn test_await_response_times_out_when_discarded() {
        let r = InterThreadRequester::<u32>::new();
        let id = r.send_request(1);
        // Respondent discards the pending request without answering.
        drop(r.fetch_request());
        let response = r.await_response(id, Timestamp::limit(Timeout::from_millis(20)));
        assert_eq!(response, None);
        // The channel is still usable afterwards.
        let id2 = r.send_request(2);
        assert!(id2 > 0);
        assert_eq!(*r.fetch_request().expect("pending").request(), 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut r = InterThreadRequester::<u32>::new();
        let id = r.send_request(1);
        r.reset();
        assert!(r.fetch_request().is_none());
        assert_eq!(r.fetch_response(id), None);
        assert_eq!(r.queued_requests(), 0);
    }
}
