//! Subsystem lifecycle tree.
//!
//! A server is a hierarchy of lifecycle-managed units:
//!
//! ```text
//! Server
//!   └── Subsystem ──── threads: [ManagedThread, …]   (started first)
//!         └── children: [Subsystem | broker | …]     (started second)
//! ```
//!
//! `start()` runs own threads in insertion order, then children in insertion
//! order — thread-provided services are available to children by the time
//! they start. `stop()` mirrors it: children in reverse insertion order
//! first, then own threads in reverse. Stopping a thread appoints
//! termination (shared flag or a `TerminationRequest` over its requester)
//! and joins bounded by `clock_timeout × await_response_ticks` (default
//! 100 ms × 3); a join that times out logs an error and leaves the thread
//! alone — the toolkit never kills.

mod fsm;
mod thread;

pub use fsm::{
    OscillatorStateMachine, SchedulerStateMachine, OscillatorState, SchedulerState,
};
pub use thread::{
    ManagedThread, OscillatorLoad, OscillatorThread, SchedulerLoad, SchedulerThread, ThreadConfig,
    WorkerScope, WorkerThread,
};

use crate::clock::Timeout;
use crate::error::Result;

/// Default await-response tick budget for thread termination.
pub const DEFAULT_AWAIT_RESPONSE_TICKS: u32 = 3;

/// A lifecycle-managed unit that can live in a subsystem tree.
///
/// [`Subsystem`] implements it for plain composites; stateful subsystems
/// (the message brokers) implement it directly.
pub trait SubsystemUnit: Send {
    /// Unit name, used in logs.
    fn name(&self) -> &str;

    /// Bring the unit up. Erroring mid-start leaves earlier members running;
    /// the caller decides whether to stop or retry.
    fn start(&mut self) -> Result<()>;

    /// Take the unit down. Must be idempotent.
    fn stop(&mut self);
}

/// Composite subsystem: owned threads plus owned child units.
///
/// Children are *moved into* their parent, which is all the back-reference
/// the lifecycle needs — registration order is the start order.
pub struct Subsystem {
    name: String,
    clock_timeout: Timeout,
    await_response_ticks: u32,
    threads: Vec<Box<dyn ManagedThread>>,
    children: Vec<Box<dyn SubsystemUnit>>,
}

impl Subsystem {
    /// Subsystem with the default 100 ms clock timeout and a tick budget of 3.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Subsystem {
            name: name.into(),
            clock_timeout: Timeout::default_timeout(),
            await_response_ticks: DEFAULT_AWAIT_RESPONSE_TICKS,
            threads: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Override the clock timeout (takes effect on the next start).
    #[must_use]
    pub fn with_clock_timeout(mut self, clock_timeout: Timeout) -> Self {
        self.clock_timeout = clock_timeout;
        self
    }

    /// Override the await-response tick budget.
    #[must_use]
    pub fn with_await_response_ticks(mut self, ticks: u32) -> Self {
        self.await_response_ticks = ticks;
        self
    }

    /// The clock timeout driving this subsystem's threads.
    #[must_use]
    pub fn clock_timeout(&self) -> Timeout {
        self.clock_timeout
    }

    /// The termination await budget, in clock ticks.
    #[must_use]
    pub fn await_response_ticks(&self) -> u32 {
        self.await_response_ticks
    }

    /// Join deadline for one thread: `clock_timeout × await_response_ticks`.
    #[must_use]
    pub fn join_timeout(&self) -> Timeout {
        self.clock_timeout * self.await_response_ticks
    }

    /// Thread configuration derived from this subsystem's clock.
    #[must_use]
    pub fn thread_config(&self) -> ThreadConfig {
        ThreadConfig {
            clock_timeout: self.clock_timeout,
            await_response_ticks: self.await_response_ticks,
        }
    }

    /// Register a thread. Threads start before children and stop after them.
    pub fn add_thread(&mut self, thread: Box<dyn ManagedThread>) {
        self.threads.push(thread);
    }

    /// Register a child unit; it starts after this subsystem's own threads.
    pub fn add_child(&mut self, child: Box<dyn SubsystemUnit>) {
        self.children.push(child);
    }

    /// Number of registered threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Number of registered children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn start_threads(&mut self) -> Result<()> {
        for thread in &mut self.threads {
            thread.start()?;
            log::debug!("[Subsystem] {}: thread '{}' has been started", self.name, thread.name());
        }
        Ok(())
    }

    fn stop_threads(&mut self) {
        let join_limit = self.join_timeout();
        for thread in self.threads.iter_mut().rev() {
            thread.appoint_termination();
            if thread.join(join_limit) {
                log::debug!(
                    "[Subsystem] {}: thread '{}' has been terminated",
                    self.name,
                    thread.name()
                );
            } else {
                log::error!(
                    "[Subsystem] {}: thread '{}' did not terminate within {:?}",
                    self.name,
                    thread.name(),
                    join_limit.duration()
                );
            }
        }
    }
}

impl SubsystemUnit for Subsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        log::debug!("[Subsystem] starting '{}'", self.name);
        self.start_threads()?;
        for child in &mut self.children {
            child.start()?;
        }
        log::debug!("[Subsystem] '{}' has been started", self.name);
        Ok(())
    }

    fn stop(&mut self) {
        log::debug!("[Subsystem] stopping '{}'", self.name);
        for child in self.children.iter_mut().rev() {
            child.stop();
        }
        self.stop_threads();
        log::debug!("[Subsystem] '{}' has been stopped", self.name);
    }
}

/// Root of a subsystem tree.
///
/// Thin wrapper that gives the application one handle to start and stop the
/// whole hierarchy; daemonization, PID files and signal handling live in the
/// embedding process, not here.
pub struct Server {
    root: Subsystem,
}

impl Server {
    /// Server around a fresh root subsystem.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Server {
            root: Subsystem::new(name),
        }
    }

    /// The root subsystem, for registering children and threads.
    pub fn root(&mut self) -> &mut Subsystem {
        &mut self.root
    }

    /// Start the whole tree.
    pub fn start(&mut self) -> Result<()> {
        self.root.start()
    }

    /// Stop the whole tree.
    pub fn stop(&mut self) {
        self.root.stop();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
