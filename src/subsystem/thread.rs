//! Subsystem thread variants.
//!
//! All variants share the same managed surface: spawn on `start`, cooperative
//! termination via [`ManagedThread::appoint_termination`], deadline-bounded
//! [`ManagedThread::join`], optional `is_running` tracking, optional startup
//! handshake (the spawned thread signals before entering its body, for
//! callers that depend on thread-local initialization being complete).
//!
//! - [`WorkerThread`] — runs a closure once and exits; termination is a
//!   shared flag the closure may poll through [`WorkerScope`].
//! - [`OscillatorThread`] — requester-driven run loop ticking every clock
//!   timeout; handles `TerminationRequest`/`PingRequest` itself and hands
//!   everything else to [`OscillatorLoad::on_request`].
//! - [`SchedulerThread`] — like the oscillator, but the load picks its own
//!   next instant.
//!
//! A thread body that panics is caught and logged at error level; the owning
//! subsystem keeps running (no automatic restart).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crate::clock::{Ticker, Timeout, Timestamp};
use crate::error::{Error, Result};
use crate::requester::{InterThreadRequester, PendingRequest, RequestId, ThreadMessage};
use crate::sync::WaitCondition;

/// Clock parameters a thread inherits from its owning subsystem.
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    /// Tick cadence of the run loop.
    pub clock_timeout: Timeout,
    /// Termination await budget, in ticks.
    pub await_response_ticks: u32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        ThreadConfig {
            clock_timeout: Timeout::default_timeout(),
            await_response_ticks: super::DEFAULT_AWAIT_RESPONSE_TICKS,
        }
    }
}

/// Polymorphic thread surface the subsystem tree manages.
pub trait ManagedThread: Send {
    /// Thread name, used in logs.
    fn name(&self) -> &str;

    /// Spawn the OS thread.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the thread is already running.
    fn start(&mut self) -> Result<()>;

    /// Ask the thread to stop at its next suspension point.
    fn appoint_termination(&mut self);

    /// Wait up to `timeout` for the thread to finish; `true` if it did.
    fn join(&mut self, timeout: Timeout) -> bool;

    /// Running state, or `None` when the thread is not trackable.
    fn is_running(&self) -> Option<bool>;
}

// ─── Shared lifecycle plumbing ──────────────────────────────────────────────

/// Start/finish bookkeeping shared with the spawned thread.
struct Lifecycle {
    running: RwLock<bool>,
    started: AtomicBool,
    finished: AtomicBool,
    cond: WaitCondition,
}

impl Lifecycle {
    fn new() -> Arc<Self> {
        Arc::new(Lifecycle {
            running: RwLock::new(false),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cond: WaitCondition::new(),
        })
    }

    fn reset(&self) {
        *self.running.write().unwrap_or_else(|e| e.into_inner()) = false;
        self.started.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);
    }

    fn mark_started(&self) {
        *self.running.write().unwrap_or_else(|e| e.into_inner()) = true;
        self.started.store(true, Ordering::Release);
        let _guard = self.cond.lock();
        self.cond.wake_all();
    }

    fn mark_finished(&self) {
        *self.running.write().unwrap_or_else(|e| e.into_inner()) = false;
        self.finished.store(true, Ordering::Release);
        let _guard = self.cond.lock();
        self.cond.wake_all();
    }

    fn is_running(&self) -> bool {
        *self.running.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the spawned thread reported startup.
    fn await_started(&self) {
        loop {
            if self.started.load(Ordering::Acquire) {
                return;
            }
            let guard = self.cond.lock();
            if self.started.load(Ordering::Acquire) {
                return;
            }
            drop(self.cond.wait(guard));
        }
    }

    /// Wait for thread exit until `limit`; `true` if it finished.
    fn await_finished(&self, limit: Timestamp) -> bool {
        loop {
            if self.finished.load(Ordering::Acquire) {
                return true;
            }
            let guard = self.cond.lock();
            if self.finished.load(Ordering::Acquire) {
                return true;
            }
            let (_guard, signalled) = self.cond.wait_until(guard, limit);
            if !signalled && !self.finished.load(Ordering::Acquire) {
                return false;
            }
        }
    }
}

fn spawn_named<T: Send + 'static>(
    name: &str,
    body: impl FnOnce() -> T + Send + 'static,
) -> Result<JoinHandle<T>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| Error::from_syscall("spawn", e))
}

// ─── One-shot worker ────────────────────────────────────────────────────────

/// Cooperative-termination view handed to a worker body.
#[derive(Clone)]
pub struct WorkerScope {
    terminate: Arc<AtomicBool>,
}

impl WorkerScope {
    /// True once termination has been appointed.
    #[must_use]
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }
}

type WorkerBody = Box<dyn FnMut(&WorkerScope) + Send>;

/// One-shot worker: invokes its closure once per start and exits.
///
/// Restartable — the closure is retained between runs.
pub struct WorkerThread {
    name: String,
    trackable: bool,
    await_startup: bool,
    lifecycle: Arc<Lifecycle>,
    terminate: Arc<AtomicBool>,
    body: Arc<Mutex<WorkerBody>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Worker around `body`. Untracked, no startup handshake, by default.
    pub fn new(name: impl Into<String>, body: impl FnMut(&WorkerScope) + Send + 'static) -> Self {
        WorkerThread {
            name: name.into(),
            trackable: false,
            await_startup: false,
            lifecycle: Lifecycle::new(),
            terminate: Arc::new(AtomicBool::new(false)),
            body: Arc::new(Mutex::new(Box::new(body))),
            handle: None,
        }
    }

    /// Enable/disable the RW-lock-backed `is_running` tracking.
    pub fn set_trackable(&mut self, trackable: bool) {
        self.trackable = trackable;
    }

    /// Make `start` block until the spawned thread is inside its body.
    pub fn set_await_startup(&mut self, await_startup: bool) {
        self.await_startup = await_startup;
    }

    fn reap_previous(&mut self) -> Result<()> {
        if self.handle.is_some() {
            if !self.lifecycle.finished.load(Ordering::Acquire) {
                return Err(Error::InvalidState("thread is already running"));
            }
            let _ = self.handle.take().map(JoinHandle::join);
        }
        Ok(())
    }
}

impl ManagedThread for WorkerThread {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        self.reap_previous()?;
        self.lifecycle.reset();
        self.terminate.store(false, Ordering::Release);

        let lifecycle = Arc::clone(&self.lifecycle);
        let body = Arc::clone(&self.body);
        let scope = WorkerScope {
            terminate: Arc::clone(&self.terminate),
        };
        let name = self.name.clone();
        self.handle = Some(spawn_named(&self.name, move || {
            lifecycle.mark_started();
            let panicked = catch_unwind(AssertUnwindSafe(|| {
                let mut body = body.lock().unwrap_or_else(|e| e.into_inner());
                (body)(&scope);
            }))
            .is_err();
            if panicked {
                log::error!("[Thread] worker '{name}' exited with a panic");
            }
            lifecycle.mark_finished();
        })?);
        if self.await_startup {
            self.lifecycle.await_started();
        }
        Ok(())
    }

    fn appoint_termination(&mut self) {
        self.terminate.store(true, Ordering::Release);
    }

    fn join(&mut self, timeout: Timeout) -> bool {
        if self.handle.is_none() {
            return true;
        }
        if self.lifecycle.await_finished(Timestamp::limit(timeout)) {
            let _ = self.handle.take().map(JoinHandle::join);
            true
        } else {
            false
        }
    }

    fn is_running(&self) -> Option<bool> {
        self.trackable.then(|| self.lifecycle.is_running())
    }
}

// ─── Requester-driven threads ───────────────────────────────────────────────

/// Load hooks of an [`OscillatorThread`].
///
/// `do_load` runs exactly once per tick interval, even when the schedule
/// slipped — missed ticks are reported through `ticks_expired`, never
/// replayed.
pub trait OscillatorLoad: Send + 'static {
    /// Called once before the loop; `false` aborts the start.
    fn on_start(&mut self) -> bool {
        true
    }

    /// One tick of work. Return `false` to stop the thread gracefully.
    fn do_load(&mut self, prev_tick: Timestamp, next_tick: Timestamp, ticks_expired: usize) -> bool;

    /// Schedule slip (`ticks_expired > 1`); `false` stops the thread.
    fn on_overload(&mut self, _prev_tick: Timestamp, _next_tick: Timestamp, _ticks_expired: usize) -> bool {
        true
    }

    /// A request other than termination/ping arrived.
    fn on_request(
        &mut self,
        _requester: &InterThreadRequester<ThreadMessage>,
        _pending: &mut PendingRequest<ThreadMessage>,
    ) {
    }

    /// Called once after the loop exits.
    fn on_stop(&mut self) {}
}

/// Load hooks of a [`SchedulerThread`].
pub trait SchedulerLoad: Send + 'static {
    /// Called once before the loop; `false` aborts the start.
    fn on_start(&mut self) -> bool {
        true
    }

    /// One iteration of work; returns the next scheduled instant. An instant
    /// already in the past schedules an immediate follow-up iteration.
    fn do_load(&mut self, start: Timestamp, limit: Timestamp) -> Timestamp;

    /// A request other than termination/ping arrived.
    fn on_request(
        &mut self,
        _requester: &InterThreadRequester<ThreadMessage>,
        _pending: &mut PendingRequest<ThreadMessage>,
    ) {
    }

    /// Called once after the loop exits.
    fn on_stop(&mut self) {}
}

/// Dispatch one control request. Returns `true` when termination was
/// appointed.
fn handle_control<F>(
    requester: &InterThreadRequester<ThreadMessage>,
    pending: &mut PendingRequest<ThreadMessage>,
    mut on_other: F,
) -> bool
where
    F: FnMut(&InterThreadRequester<ThreadMessage>, &mut PendingRequest<ThreadMessage>),
{
    match pending.request() {
        ThreadMessage::TerminationRequest => {
            log::debug!("[Thread] termination request received -> leaving the run loop");
            if pending.response_required() {
                requester.send_response(pending, ThreadMessage::OkResponse);
            }
            true
        }
        ThreadMessage::PingRequest => {
            if pending.response_required() {
                requester.send_response(pending, ThreadMessage::PongResponse);
            }
            false
        }
        _ => {
            on_other(requester, pending);
            false
        }
    }
}

/// State and spawn/join plumbing shared by the requester-driven variants.
struct RequesterCore<L> {
    name: String,
    config: ThreadConfig,
    trackable: bool,
    await_startup: bool,
    lifecycle: Arc<Lifecycle>,
    requester: Arc<InterThreadRequester<ThreadMessage>>,
    termination_request: Option<RequestId>,
    load: Option<L>,
    handle: Option<JoinHandle<Option<L>>>,
}

impl<L: Send + 'static> RequesterCore<L> {
    fn new(name: String, config: ThreadConfig, load: L) -> Self {
        RequesterCore {
            name,
            config,
            trackable: false,
            await_startup: false,
            lifecycle: Lifecycle::new(),
            requester: Arc::new(InterThreadRequester::new()),
            termination_request: None,
            load: Some(load),
            handle: None,
        }
    }

    fn start_with(
        &mut self,
        run: impl FnOnce(&mut L, &InterThreadRequester<ThreadMessage>, Timeout) + Send + 'static,
    ) -> Result<()> {
        if self.handle.is_some() {
            if !self.lifecycle.finished.load(Ordering::Acquire) {
                return Err(Error::InvalidState("thread is already running"));
            }
            self.load = self.handle.take().and_then(|h| h.join().ok()).flatten();
        }
        let load = self
            .load
            .take()
            .ok_or(Error::InvalidState("thread load was lost by a previous run"))?;
        self.lifecycle.reset();
        self.termination_request = None;

        let lifecycle = Arc::clone(&self.lifecycle);
        let requester = Arc::clone(&self.requester);
        let clock_timeout = self.config.clock_timeout;
        let name = self.name.clone();
        self.handle = Some(spawn_named(&self.name, move || {
            lifecycle.mark_started();
            let mut load = load;
            let panicked = catch_unwind(AssertUnwindSafe(|| {
                run(&mut load, &requester, clock_timeout);
            }))
            .is_err();
            if panicked {
                log::error!("[Thread] '{name}' exited with a panic");
            }
            lifecycle.mark_finished();
            if panicked {
                None
            } else {
                Some(load)
            }
        })?);
        if self.await_startup {
            self.lifecycle.await_started();
        }
        Ok(())
    }

    fn appoint_termination(&mut self) {
        if self.handle.is_none() || self.lifecycle.finished.load(Ordering::Acquire) {
            return;
        }
        let id = self.requester.send_request(ThreadMessage::TerminationRequest);
        if id == 0 {
            log::error!(
                "[Thread] could not send termination request to '{}': requester overflow",
                self.name
            );
        } else {
            self.termination_request = Some(id);
        }
    }

    fn join(&mut self, timeout: Timeout) -> bool {
        if self.handle.is_none() {
            return true;
        }
        let limit = Timestamp::limit(timeout);
        if let Some(id) = self.termination_request.take() {
            match self.requester.await_response(id, limit) {
                Some(ThreadMessage::OkResponse) => {
                    log::debug!("[Thread] '{}' acknowledged termination", self.name);
                }
                Some(other) => {
                    log::error!(
                        "[Thread] '{}' sent an invalid termination response: {other:?}",
                        self.name
                    );
                }
                None => {
                    log::error!(
                        "[Thread] no response to termination request from '{}'",
                        self.name
                    );
                }
            }
        }
        if self.lifecycle.await_finished(limit) {
            self.load = self.handle.take().and_then(|h| h.join().ok()).flatten();
            true
        } else {
            false
        }
    }

    fn is_running(&self) -> Option<bool> {
        self.trackable.then(|| self.lifecycle.is_running())
    }
}

/// Periodic requester-driven thread: ticks every clock timeout.
pub struct OscillatorThread<L: OscillatorLoad> {
    core: RequesterCore<L>,
}

impl<L: OscillatorLoad> OscillatorThread<L> {
    /// Oscillator around `load`, ticking at `config.clock_timeout`.
    pub fn new(name: impl Into<String>, config: ThreadConfig, load: L) -> Self {
        OscillatorThread {
            core: RequesterCore::new(name.into(), config, load),
        }
    }

    /// Handle for sending requests to the running thread.
    #[must_use]
    pub fn requester(&self) -> Arc<InterThreadRequester<ThreadMessage>> {
        Arc::clone(&self.core.requester)
    }

    /// Enable the `is_running` tracking.
    pub fn set_trackable(&mut self, trackable: bool) {
        self.core.trackable = trackable;
    }

    /// Make `start` block until the thread entered its run loop.
    pub fn set_await_startup(&mut self, await_startup: bool) {
        self.core.await_startup = await_startup;
    }

    /// The load, between runs.
    pub fn load(&self) -> Option<&L> {
        self.core.load.as_ref()
    }
}

fn oscillator_loop<L: OscillatorLoad>(
    load: &mut L,
    requester: &InterThreadRequester<ThreadMessage>,
    clock_timeout: Timeout,
) {
    if !load.on_start() {
        log::debug!("[Thread] oscillator terminated by on_start()");
        return;
    }
    let mut ticker = Ticker::new(clock_timeout);
    'run: loop {
        let (prev, next, ticks_expired) = ticker.tick();
        if ticks_expired > 1 {
            log::warn!("[Thread] oscillator overload detected: {ticks_expired} ticks expired");
            if !load.on_overload(prev, next, ticks_expired) {
                log::debug!("[Thread] oscillator terminated by on_overload()");
                break;
            }
        }
        if !load.do_load(prev, next, ticks_expired) {
            log::debug!("[Thread] oscillator terminated by do_load()");
            break;
        }
        // Requests are processed up to the next tick.
        while let Some(mut pending) = requester.await_request(next) {
            if handle_control(requester, &mut pending, |r, p| load.on_request(r, p)) {
                break 'run;
            }
        }
    }
    load.on_stop();
}

impl<L: OscillatorLoad> ManagedThread for OscillatorThread<L> {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn start(&mut self) -> Result<()> {
        self.core.start_with(oscillator_loop)
    }

    fn appoint_termination(&mut self) {
        self.core.appoint_termination();
    }

    fn join(&mut self, timeout: Timeout) -> bool {
        self.core.join(timeout)
    }

    fn is_running(&self) -> Option<bool> {
        self.core.is_running()
    }
}

/// Requester-driven thread whose load picks its own next instant.
pub struct SchedulerThread<L: SchedulerLoad> {
    core: RequesterCore<L>,
}

impl<L: SchedulerLoad> SchedulerThread<L> {
    /// Scheduler around `load`.
    pub fn new(name: impl Into<String>, config: ThreadConfig, load: L) -> Self {
        SchedulerThread {
            core: RequesterCore::new(name.into(), config, load),
        }
    }

    /// Handle for sending requests to the running thread.
    #[must_use]
    pub fn requester(&self) -> Arc<InterThreadRequester<ThreadMessage>> {
        Arc::clone(&self.core.requester)
    }

    /// Enable the `is_running` tracking.
    pub fn set_trackable(&mut self, trackable: bool) {
        self.core.trackable = trackable;
    }

    /// Make `start` block until the thread entered its run loop.
    pub fn set_await_startup(&mut self, await_startup: bool) {
        self.core.await_startup = await_startup;
    }
}

fn scheduler_loop<L: SchedulerLoad>(
    load: &mut L,
    requester: &InterThreadRequester<ThreadMessage>,
    _clock_timeout: Timeout,
) {
    if !load.on_start() {
        log::debug!("[Thread] scheduler terminated by on_start()");
        return;
    }
    let mut limit = Timestamp::now();
    'run: loop {
        let start = Timestamp::now();
        limit = load.do_load(start, limit);
        if limit.expired() {
            // Behind schedule: drain control requests without sleeping and
            // run the next iteration immediately.
            while let Some(mut pending) = requester.fetch_request() {
                if handle_control(requester, &mut pending, |r, p| load.on_request(r, p)) {
                    break 'run;
                }
            }
        } else {
            while let Some(mut pending) = requester.await_request(limit) {
                if handle_control(requester, &mut pending, |r, p| load.on_request(r, p)) {
                    break 'run;
                }
            }
        }
    }
    load.on_stop();
}

impl<L: SchedulerLoad> ManagedThread for SchedulerThread<L> {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn start(&mut self) -> Result<()> {
        self.core.start_with(scheduler_loop)
    }

    fn appoint_termination(&mut self) {
        self.core.appoint_termination();
    }

    fn join(&mut self, timeout: Timeout) -> bool {
        self.core.join(timeout)
    }

    fn is_running(&self) -> Option<bool> {
        self.core.is_running()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_worker_runs_once_and_joins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut worker = {
            let counter = Arc::clone(&counter);
            WorkerThread::new("once", move |_: &WorkerScope| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        worker.start().expect("start");
        assert!(worker.join(Timeout::new(5, 0)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_double_start_is_invalid_state() {
        let mut worker = WorkerThread::new("idle", |scope: &WorkerScope| {
            while !scope.should_terminate() {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        worker.set_await_startup(true);
        worker.start().expect("start");
        assert!(matches!(worker.start(), Err(Error::InvalidState(_))));
        worker.appoint_termination();
        assert!(worker.join(Timeout::new(5, 0)));
        // After a clean join it can be started again.
        worker.start().expect("restart");
        worker.appoint_termination();
        assert!(worker.join(Timeout::new(5, 0)));
    }

    #[test]
    fn test_worker_tracking_reports_running() {
        let mut worker = WorkerThread::new("tracked", |scope: &WorkerScope| {
            while !scope.should_terminate() {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        worker.set_trackable(true);
        worker.set_await_startup(true);
        assert_eq!(worker.is_running(), Some(false));
        worker.start().expect("start");
        assert_eq!(worker.is_running(), Some(true));
        worker.appoint_termination();
        assert!(worker.join(Timeout::new(5, 0)));
        assert_eq!(worker.is_running(), Some(false));
    }

    #[test]
    fn test_worker_join_times_out_on_stuck_thread() {
        let release = Arc::new(AtomicBool::new(false));
        let mut worker = {
            let release = Arc::clone(&release);
            WorkerThread::new("stuck", move |_: &WorkerScope| {
                while !release.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };
        worker.start().expect("start");
        worker.appoint_termination();
        assert!(!worker.join(Timeout::from_millis(30)));
        release.store(true, Ordering::Release);
        assert!(worker.join(Timeout::new(5, 0)));
    }

    struct CountingLoad {
        ticks: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
    }

    impl OscillatorLoad for CountingLoad {
        fn do_load(&mut self, _prev: Timestamp, _next: Timestamp, _expired: usize) -> bool {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn on_stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_oscillator_ticks_and_terminates_via_requester() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let config = ThreadConfig {
            clock_timeout: Timeout::from_millis(10),
            await_response_ticks: 3,
        };
        let mut thread = OscillatorThread::new(
            "oscillator",
            config,
            CountingLoad {
                ticks: Arc::clone(&ticks),
                stopped: Arc::clone(&stopped),
            },
        );
        thread.set_await_startup(true);
        thread.start().expect("start");
        std::thread::sleep(Duration::from_millis(50));
        thread.appoint_termination();
        assert!(thread.join(Timeout::new(5, 0)));
        assert!(ticks.load(Ordering::SeqCst) >= 2, "oscillator barely ticked");
        assert!(stopped.load(Ordering::SeqCst), "on_stop did not run");
    }

    #[test]
    fn test_oscillator_answers_ping() {
        let config = ThreadConfig {
            clock_timeout: Timeout::from_millis(10),
            await_response_ticks: 3,
        };
        let mut thread = OscillatorThread::new(
            "pingable",
            config,
            CountingLoad {
                ticks: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicBool::new(false)),
            },
        );
        thread.start().expect("start");
        let requester = thread.requester();
        let id = requester.send_request(ThreadMessage::PingRequest);
        assert!(id > 0);
        let pong = requester.await_response(id, Timestamp::limit(Timeout::new(5, 0)));
        assert_eq!(pong, Some(ThreadMessage::PongResponse));
        thread.appoint_termination();
        assert!(thread.join(Timeout::new(5, 0)));
    }

    struct BurstLoad {
        iterations: Arc<AtomicUsize>,
    }

    impl SchedulerLoad for BurstLoad {
        fn do_load(&mut self, start: Timestamp, _limit: Timestamp) -> Timestamp {
            let n = self.iterations.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                // Already passed: schedule an immediate follow-up.
                start
            } else {
                start + Timeout::from_millis(10)
            }
        }
    }

    #[test]
    fn test_scheduler_reschedules_immediately_when_behind() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let mut thread = SchedulerThread::new(
            "scheduler",
            ThreadConfig::default(),
            BurstLoad {
                iterations: Arc::clone(&iterations),
            },
        );
        thread.start().expect("start");
        std::thread::sleep(Duration::from_millis(50));
        thread.appoint_termination();
        assert!(thread.join(Timeout::new(5, 0)));
        assert!(iterations.load(Ordering::SeqCst) >= 4);
    }
}
