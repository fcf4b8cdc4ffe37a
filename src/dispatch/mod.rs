//! Worker-pool task dispatchers.
//!
//! [`TaskDispatcher`] feeds owned tasks to a fixed pool of worker threads
//! through a FIFO queue guarded by one mutex + condvar. Admission is
//! backpressure-first: a task is accepted only while
//! `queue_len + 1 ≤ awaiting_workers + max_overflow`, otherwise `perform`
//! hands the task straight back to the caller.
//!
//! Termination is cooperative: long-running tasks poll
//! [`Worker::should_terminate`]; `stop` sets every worker's flag, wakes the
//! pool and joins. Tasks still queued at stop are discarded with a warning.

mod multi;

pub use multi::{MultiTaskDispatcher, TaskMethod};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::subsystem::SubsystemUnit;

/// A unit of work executed on a pool worker.
pub trait Task: Send + 'static {
    /// Run the task. Cooperating tasks poll `worker.should_terminate()`.
    fn execute(&mut self, worker: &Worker);
}

/// Blanket impl so closures can be dispatched directly.
impl<F: FnMut(&Worker) + Send + 'static> Task for F {
    fn execute(&mut self, worker: &Worker) {
        self(worker);
    }
}

/// Boxed tasks dispatch too, for pools mixing task types.
impl Task for Box<dyn Task> {
    fn execute(&mut self, worker: &Worker) {
        (**self).execute(worker);
    }
}

/// Per-worker view handed to executing tasks.
pub struct Worker {
    terminate: Arc<AtomicBool>,
}

impl Worker {
    /// True once the dispatcher asked this worker to stop.
    #[must_use]
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }
}

pub(crate) struct PoolState<I> {
    pub(crate) queue: VecDeque<I>,
    pub(crate) awaiting_workers: usize,
}

pub(crate) struct Pool<I> {
    pub(crate) state: Mutex<PoolState<I>>,
    pub(crate) cond: Condvar,
}

impl<I> Pool<I> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Pool {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                awaiting_workers: 0,
            }),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn locked(&self) -> MutexGuard<'_, PoolState<I>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) struct PoolWorker {
    pub(crate) terminate: Arc<AtomicBool>,
    pub(crate) handle: JoinHandle<()>,
}

pub(crate) fn run_pool_worker<I, F>(pool: &Pool<I>, terminate: &Arc<AtomicBool>, mut execute: F)
where
    F: FnMut(I, &Worker),
{
    let worker = Worker {
        terminate: Arc::clone(terminate),
    };
    let mut state = pool.locked();
    loop {
        if worker.should_terminate() {
            break;
        }
        if let Some(item) = state.queue.pop_front() {
            drop(state);
            execute(item, &worker);
            state = pool.locked();
        } else {
            state.awaiting_workers += 1;
            state = pool.cond.wait(state).unwrap_or_else(|e| e.into_inner());
            state.awaiting_workers -= 1;
        }
    }
}

/// Fixed pool of workers executing single-method tasks.
pub struct TaskDispatcher<T: Task> {
    name: String,
    workers_amount: usize,
    max_overflow: usize,
    pool: Arc<Pool<T>>,
    workers: Vec<PoolWorker>,
}

impl<T: Task> TaskDispatcher<T> {
    /// Dispatcher with `workers_amount` workers and a queue overflow
    /// allowance of `max_overflow` tasks beyond the idle-worker count.
    #[must_use]
    pub fn new(name: impl Into<String>, workers_amount: usize, max_overflow: usize) -> Self {
        TaskDispatcher {
            name: name.into(),
            workers_amount,
            max_overflow,
            pool: Pool::new(),
            workers: Vec::new(),
        }
    }

    /// Offer a task to the pool.
    ///
    /// On overflow the task comes straight back as `Err` — the caller keeps
    /// ownership and decides the policy.
    pub fn perform(&self, task: T) -> std::result::Result<(), T> {
        let mut state = self.pool.locked();
        if state.queue.len() + 1 <= state.awaiting_workers + self.max_overflow {
            state.queue.push_back(task);
            drop(state);
            self.pool.cond.notify_one();
            Ok(())
        } else {
            drop(state);
            log::warn!("[Dispatcher] {}: task queue overflow, task rejected", self.name);
            Err(task)
        }
    }

    /// Number of workers currently blocked waiting for work.
    #[must_use]
    pub fn awaiting_workers(&self) -> usize {
        self.pool.locked().awaiting_workers
    }
}

impl<T: Task> SubsystemUnit for TaskDispatcher<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Err(crate::error::Error::InvalidState("dispatcher is already started"));
        }
        for n in 0..self.workers_amount {
            let terminate = Arc::new(AtomicBool::new(false));
            let pool = Arc::clone(&self.pool);
            let worker_terminate = Arc::clone(&terminate);
            let handle = std::thread::Builder::new()
                .name(format!("{}-worker-{n}", self.name))
                .spawn(move || {
                    run_pool_worker(&pool, &worker_terminate, |mut task: T, worker| {
                        task.execute(worker);
                    });
                })
                .map_err(|e| crate::error::Error::from_syscall("spawn", e))?;
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
            log::warn!("[Dispatcher] {}: {dropped} queued task(s) discarded at stop", self.name);
        }
        log::debug!("[Dispatcher] {}: stopped", self.name);
    }
}

impl<T: Task> Drop for TaskDispatcher<T> {
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

    fn started<T: Task>(workers: usize, overflow: usize) -> TaskDispatcher<T> {
        let mut d = TaskDispatcher::new("test-pool", workers, overflow);
        d.start().expect("start");
        d
    }

    fn await_idle<T: Task>(d: &TaskDispatcher<T>, workers: usize) {
        // Workers register as awaiting shortly after start/executions.
        for _ in 0..500 {
            if d.awaiting_workers() == workers {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("workers never became idle");
    }

    #[test]
    fn test_tasks_execute_on_pool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut d = started(2, 4);
        await_idle(&d, 2);
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            let task = move |_: &Worker| {
                counter.fetch_add(1, Ordering::SeqCst);
            };
            assert!(d.perform(task).is_ok());
        }
        for _ in 0..500 {
            if counter.load(Ordering::SeqCst) == 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        d.stop();
    }

    #[test]
    fn test_overflow_returns_task_to_caller() {
        // No workers and no overflow allowance: everything is rejected.
        let d: TaskDispatcher<fn(&Worker)> = started(0, 0);
        fn nop(_: &Worker) {}
        let rejected = d.perform(nop as fn(&Worker));
        assert!(rejected.is_err());
    }

    #[test]
    fn test_admission_boundary_is_exact() {
        // 1 idle worker + overflow 1: two tasks admitted, the third refused.
        let barrier = Arc::new(AtomicBool::new(false));
        let mut d: TaskDispatcher<Box<dyn Task>> = started(1, 1);
        await_idle(&d, 1);

        let hold: Box<dyn Task> = {
            let barrier = Arc::clone(&barrier);
            Box::new(move |w: &Worker| {
                while !barrier.load(Ordering::Acquire) && !w.should_terminate() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };
        assert!(d.perform(hold).is_ok());

        // The worker is now busy (not awaiting): only the overflow slot is
        // left.
        for _ in 0..500 {
            if d.awaiting_workers() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(d.perform(Box::new(|_: &Worker| {})).is_ok());
        assert!(d.perform(Box::new(|_: &Worker| {})).is_err());

        barrier.store(true, Ordering::Release);
        d.stop();
    }

    #[test]
    fn test_stop_terminates_cooperating_task() {
        let mut d = started(1, 1);
        await_idle(&d, 1);
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            let task = move |w: &Worker| {
                while !w.should_terminate() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                ran.store(true, Ordering::SeqCst);
            };
            assert!(d.perform(task).is_ok());
        }
        std::thread::sleep(Duration::from_millis(10));
        d.stop();
        assert!(ran.load(Ordering::SeqCst));
    }
}
