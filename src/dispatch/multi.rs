//! Multi-method task dispatcher.
//!
//! [`MultiTaskDispatcher::perform`] takes one task plus an ordered list of
//! methods and enqueues *all* methods atomically — either every method fits
//! within `awaiting_workers + max_overflow`, or the whole batch is refused
//! and handed back. There is no retry on overflow.
//!
//! The task rides an `Arc`, so methods of one task may run concurrently on
//! different workers and the last finishing method drops the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dispatch::{run_pool_worker, Pool, PoolWorker, Worker};
use crate::error::{Error, Result};
use crate::subsystem::SubsystemUnit;

/// One method of a multi-method task.
pub type TaskMethod<T> = Box<dyn FnOnce(&T, &Worker) + Send>;

type QueueItem<T> = (Arc<T>, TaskMethod<T>);

/// Worker pool executing several methods of one shared task.
pub struct MultiTaskDispatcher<T: Send + Sync + 'static> {
    name: String,
    workers_amount: usize,
    max_overflow: usize,
    pool: Arc<Pool<QueueItem<T>>>,
    workers: Vec<PoolWorker>,
}

impl<T: Send + Sync + 'static> MultiTaskDispatcher<T> {
    /// Dispatcher with `workers_amount` workers.
    #[must_use]
    pub fn new(name: impl Into<String>, workers_amount: usize, max_overflow: usize) -> Self {
        MultiTaskDispatcher {
            name: name.into(),
            workers_amount,
            max_overflow,
            pool: Pool::new(),
            workers: Vec::new(),
        }
    }

    /// Offer `task` with its methods; all-or-none admission.
    ///
    /// On overflow the task comes back as `Err` (the method list is consumed
    /// in either case only when admitted — a refused call returns it too).
    pub fn perform(
        &self,
        task: T,
        methods: Vec<TaskMethod<T>>,
    ) -> std::result::Result<(), (T, Vec<TaskMethod<T>>)> {
        if methods.is_empty() {
            return Ok(());
        }
        // Check and enqueue under one lock: either the whole batch is
        // admitted, or the task and its methods return to the caller.
        let mut state = self.pool.locked();
        if state.queue.len() + methods.len() > state.awaiting_workers + self.max_overflow {
            drop(state);
            log::warn!(
                "[Dispatcher] {}: task queue overflow, {} method(s) rejected",
                self.name,
                methods.len()
            );
            return Err((task, methods));
        }
        let shared = Arc::new(task);
        for method in methods {
            state.queue.push_back((Arc::clone(&shared), method));
        }
        drop(state);
        self.pool.cond.notify_all();
        Ok(())
    }

    /// Number of workers currently blocked waiting for work.
    #[must_use]
    pub fn awaiting_workers(&self) -> usize {
        self.pool.locked().awaiting_workers
    }
}

impl<T: Send + Sync + 'static> SubsystemUnit for MultiTaskDispatcher<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Err(Error::InvalidState("dispatcher is already started"));
        }
        for n in 0..self.workers_amount {
            let terminate = Arc::new(AtomicBool::new(false));
            let pool = Arc::clone(&self.pool);
            let worker_terminate = Arc::clone(&terminate);
            let handle = std::thread::Builder::new()
                .name(format!("{}-worker-{n}", self.name))
                .spawn(move || {
                    run_pool_worker(&pool, &worker_terminate, |(task, method): QueueItem<T>, worker| {
                        method(&task, worker);
                        // Dropping `task` here releases the shared state once
                        // the last method finishes.
                    });
                })
                .map_err(|e| Error::from_syscall("spawn", e))?;
            self.workers.push(PoolWorker { terminate, handle });
        }
        log::debug!("[Dispatcher] {}: {} workers started", self.name, self.workers_amount);
        Ok(())
    }

    fn stop(&mut self) {
        for worker in &self.workers {
            worker.terminate.store(true, Ordering::Release);
        }
        self.pool.cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.handle.join();
        }
        let dropped = {
            let mut state = self.pool.locked();
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        if dropped > 0 {
            log::warn!(
                "[Dispatcher] {}: {dropped} queued method(s) discarded at stop",
                self.name
            );
        }
        log::debug!("[Dispatcher] {}: stopped", self.name);
    }
}

impl<T: Send + Sync + 'static> Drop for MultiTaskDispatcher<T> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SharedCounter {
        hits: AtomicUsize,
    }

    #[test]
    fn test_all_methods_run_against_one_task() {
        let mut d: MultiTaskDispatcher<SharedCounter> = MultiTaskDispatcher::new("multi", 2, 4);
        d.start().expect("start");

        let methods: Vec<TaskMethod<SharedCounter>> = vec![
            Box::new(|t, _| {
                t.hits.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|t, _| {
                t.hits.fetch_add(10, Ordering::SeqCst);
            }),
        ];
        let task = SharedCounter {
            hits: AtomicUsize::new(0),
        };
        // Observe the total through a side channel: methods sum into a
        // shared atomic owned by the task, checked via a third method.
        let observed = Arc::new(AtomicUsize::new(0));
        let mut methods = methods;
        {
            let observed = Arc::clone(&observed);
            methods.push(Box::new(move |t, _| {
                // Give the sibling methods a moment to land.
                for _ in 0..500 {
                    if t.hits.load(Ordering::SeqCst) == 11 {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                observed.store(t.hits.load(Ordering::SeqCst), Ordering::SeqCst);
            }));
        }

        // Wait until enough workers await to admit the batch.
        for _ in 0..500 {
            if d.awaiting_workers() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(d.perform(task, methods).is_ok());

        for _ in 0..500 {
            if observed.load(Ordering::SeqCst) == 11 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(observed.load(Ordering::SeqCst), 11);
        d.stop();
    }

    #[test]
    fn test_batch_admission_is_all_or_none() {
        // One worker, no overflow: a two-method batch cannot be admitted.
        let mut d: MultiTaskDispatcher<SharedCounter> = MultiTaskDispatcher::new("strict", 1, 0);
        d.start().expect("start");
        for _ in 0..500 {
            if d.awaiting_workers() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let methods: Vec<TaskMethod<SharedCounter>> = vec![
            Box::new(|_, _| {}),
            Box::new(|_, _| {}),
        ];
        let task = SharedCounter {
            hits: AtomicUsize::new(0),
        };
        let rejected = d.perform(task, methods);
        let (returned_task, returned_methods) = rejected.expect_err("batch must be refused");
        assert_eq!(returned_task.hits.load(Ordering::SeqCst), 0);
        assert_eq!(returned_methods.len(), 2);
        d.stop();
    }

    #[test]
    fn test_empty_method_list_is_a_noop() {
        let mut d: MultiTaskDispatcher<SharedCounter> = MultiTaskDispatcher::new("noop", 1, 0);
        d.start().expect("start");
        let task = SharedCounter {
            hits: AtomicUsize::new(0),
        };
        assert!(d.perform(task, Vec::new()).is_ok());
        d.stop();
    }
}
