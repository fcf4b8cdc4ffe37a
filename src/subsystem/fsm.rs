//! Finite-state-machine layers over the requester-driven threads.
//!
//! A state machine is just a load whose `do_load` delegates to the current
//! state's `make_step`. The machine installs the successor state before the
//! next step; returning `None` keeps the current state.

use crate::clock::{Timeout, Timestamp};
use crate::subsystem::thread::{OscillatorLoad, SchedulerLoad};

/// One state of an oscillator-driven machine.
pub trait OscillatorState: Send + 'static {
    /// Perform this state's step; bounded by the tick deadline.
    ///
    /// Return the successor state, or `None` to stay.
    fn make_step(&mut self, limit: Timestamp) -> Option<Box<dyn OscillatorState>>;

    /// State name for logs.
    fn name(&self) -> &'static str {
        "state"
    }
}

/// One state of a scheduler-driven machine.
pub trait SchedulerState: Send + 'static {
    /// Perform this state's step; returns the successor (or `None` to stay)
    /// and the delay before the next step.
    fn make_step(&mut self, limit: Timestamp) -> (Option<Box<dyn SchedulerState>>, Timeout);

    /// State name for logs.
    fn name(&self) -> &'static str {
        "state"
    }
}

/// Oscillator load stepping a chain of [`OscillatorState`]s, one step per
/// tick.
pub struct OscillatorStateMachine {
    state: Box<dyn OscillatorState>,
}

impl OscillatorStateMachine {
    /// Machine starting in `initial`.
    #[must_use]
    pub fn new(initial: Box<dyn OscillatorState>) -> Self {
        OscillatorStateMachine { state: initial }
    }

    /// Name of the current state.
    #[must_use]
    pub fn current_state(&self) -> &'static str {
        self.state.name()
    }
}

impl OscillatorLoad for OscillatorStateMachine {
    fn do_load(&mut self, _prev_tick: Timestamp, next_tick: Timestamp, _ticks_expired: usize) -> bool {
        if let Some(next) = self.state.make_step(next_tick) {
            log::debug!(
                "[Fsm] transition: {} -> {}",
                self.state.name(),
                next.name()
            );
            self.state = next;
        }
        true
    }
}

/// Scheduler load stepping a chain of [`SchedulerState`]s at the cadence the
/// states themselves choose.
pub struct SchedulerStateMachine {
    state: Box<dyn SchedulerState>,
}

impl SchedulerStateMachine {
    /// Machine starting in `initial`.
    #[must_use]
    pub fn new(initial: Box<dyn SchedulerState>) -> Self {
        SchedulerStateMachine { state: initial }
    }

    /// Name of the current state.
    #[must_use]
    pub fn current_state(&self) -> &'static str {
        self.state.name()
    }
}

impl SchedulerLoad for SchedulerStateMachine {
    fn do_load(&mut self, start: Timestamp, limit: Timestamp) -> Timestamp {
        let (next, delay) = self.state.make_step(limit);
        if let Some(next) = next {
            log::debug!(
                "[Fsm] transition: {} -> {}",
                self.state.name(),
                next.name()
            );
            self.state = next;
        }
        start + delay
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystem::thread::{ManagedThread, OscillatorThread, ThreadConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Even {
        steps: Arc<AtomicUsize>,
    }
    struct Odd {
        steps: Arc<AtomicUsize>,
    }

    impl OscillatorState for Even {
        fn make_step(&mut self, _limit: Timestamp) -> Option<Box<dyn OscillatorState>> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(Odd {
                steps: Arc::clone(&self.steps),
            }))
        }

        fn name(&self) -> &'static str {
            "even"
        }
    }

    impl OscillatorState for Odd {
        fn make_step(&mut self, _limit: Timestamp) -> Option<Box<dyn OscillatorState>> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(Even {
                steps: Arc::clone(&self.steps),
            }))
        }

        fn name(&self) -> &'static str {
            "odd"
        }
    }

    #[test]
    fn test_machine_alternates_states() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut machine = OscillatorStateMachine::new(Box::new(Even {
            steps: Arc::clone(&steps),
        }));
        assert_eq!(machine.current_state(), "even");
        assert!(machine.do_load(Timestamp::now(), Timestamp::now(), 1));
        assert_eq!(machine.current_state(), "odd");
        assert!(machine.do_load(Timestamp::now(), Timestamp::now(), 1));
        assert_eq!(machine.current_state(), "even");
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_machine_runs_on_oscillator_thread() {
        let steps = Arc::new(AtomicUsize::new(0));
        let machine = OscillatorStateMachine::new(Box::new(Even {
            steps: Arc::clone(&steps),
        }));
        let config = ThreadConfig {
            clock_timeout: crate::clock::Timeout::from_millis(10),
            await_response_ticks: 3,
        };
        let mut thread = OscillatorThread::new("fsm", config, machine);
        thread.start().expect("start");
        std::thread::sleep(Duration::from_millis(50));
        thread.appoint_termination();
        assert!(thread.join(crate::clock::Timeout::new(5, 0)));
        assert!(steps.load(Ordering::SeqCst) >= 2);
    }
}
