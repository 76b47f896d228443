//! Blocking synchronization helpers shared by the supervisor and servers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it. Every value guarded this way stays consistent between
/// statements, so the poison flag carries no information for us.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-permit, coalescing wake-up signal.
///
/// `give` opens the gate; `take` blocks until it is open and closes it
/// again. Gives that arrive while the gate is already open are absorbed,
/// so one waiter wakes per logical transition no matter how many times the
/// transition was reported.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    gives: u64,
}

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate and wake one waiter.
    pub fn give(&self) {
        let mut state = lock(&self.state);
        state.open = true;
        state.gives += 1;
        self.cond.notify_one();
    }

    /// Block until the gate is open, then close it.
    pub fn take(&self) {
        let mut state = lock(&self.state);
        while !state.open {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.open = false;
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    ///
    /// Returns `true` if a permit was consumed.
    pub fn take_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while !state.open {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.open = false;
        true
    }

    /// Consume the permit if one is available, without blocking.
    pub fn try_take(&self) -> bool {
        let mut state = lock(&self.state);
        std::mem::replace(&mut state.open, false)
    }

    /// Check whether a permit is waiting, without consuming it.
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Total number of `give` calls since creation.
    pub fn give_count(&self) -> u64 {
        lock(&self.state).gives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_gate_is_closed() {
        let gate = Gate::new();
        assert!(!gate.is_open());
        assert!(!gate.try_take());
        assert!(!gate.take_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_gives_coalesce() {
        let gate = Gate::new();
        gate.give();
        gate.give();
        gate.give();
        assert_eq!(gate.give_count(), 3);

        // Only one permit survives
        assert!(gate.try_take());
        assert!(!gate.try_take());
    }

    #[test]
    fn test_take_wakes_on_give() {
        let gate = Arc::new(Gate::new());
        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || {
            waiter_gate.take();
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        gate.give();
        waiter.join().unwrap();
        assert!(!gate.is_open());
    }

    #[test]
    fn test_single_waiter_per_give() {
        let gate = Arc::new(Gate::new());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let g = gate.clone();
                thread::spawn(move || g.take_timeout(Duration::from_millis(300)))
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        gate.give();

        let woken = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|took| *took)
            .count();
        assert_eq!(woken, 1);
    }
}
