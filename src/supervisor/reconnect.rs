//! Deferred, cancellable reconnect timer.
//!
//! A dedicated thread sleeps until the armed deadline and then runs the
//! retry action. At most one retry is ever pending: arming replaces any
//! pending deadline, and [`ReconnectScheduler::rearm`] performs the
//! cancel-then-arm sequence under a single lock so the worker can never
//! observe the gap between the two.

use crate::sync::lock;
use log::{debug, warn};
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reports whether the scheduler has been shut down. Retry actions poll it
/// between attempts so shutdown never waits on an endless retry loop.
pub type StopCheck<'a> = &'a dyn Fn() -> bool;

#[derive(Debug, Default)]
struct Slot {
    deadline: Option<Instant>,
    shutdown: bool,
    fired: u64,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        lock(&self.slot).shutdown
    }
}

/// One-shot reconnect timer backed by its own thread.
pub struct ReconnectScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    /// Create an idle scheduler. Nothing fires until [`start`](Self::start)
    /// has spawned the timer thread.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the timer thread. `action` runs on that thread each time an
    /// armed deadline expires.
    pub fn start<F>(&self, action: F) -> io::Result<()>
    where
        F: Fn(StopCheck<'_>) + Send + 'static,
    {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "reconnect scheduler already started",
            ));
        }
        let shared = self.shared.clone();
        *worker = Some(
            thread::Builder::new()
                .name("reconnect".into())
                .spawn(move || Self::run(shared, action))?,
        );
        Ok(())
    }

    fn run<F>(shared: Arc<Shared>, action: F)
    where
        F: Fn(StopCheck<'_>),
    {
        loop {
            {
                let mut slot = lock(&shared.slot);
                loop {
                    if slot.shutdown {
                        return;
                    }
                    match slot.deadline {
                        None => {
                            slot = shared
                                .wake
                                .wait(slot)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                slot.deadline = None;
                                slot.fired += 1;
                                break;
                            }
                            slot = shared
                                .wake
                                .wait_timeout(slot, deadline - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                        }
                    }
                }
            }

            debug!("Reconnect timer fired");
            let stopped = || shared.is_shutdown();
            action(&stopped);
        }
    }

    /// Arm the timer to fire after `delay`, replacing any pending deadline.
    pub fn arm(&self, delay: Duration) {
        let mut slot = lock(&self.shared.slot);
        if slot.shutdown {
            warn!("Reconnect requested after shutdown; ignoring");
            return;
        }
        slot.deadline = Some(Instant::now() + delay);
        self.shared.wake.notify_one();
    }

    /// Cancel any pending retry and arm a fresh one, atomically.
    pub fn rearm(&self, delay: Duration) {
        let mut slot = lock(&self.shared.slot);
        if slot.shutdown {
            warn!("Reconnect requested after shutdown; ignoring");
            return;
        }
        if slot.deadline.take().is_some() {
            debug!("Replacing pending reconnect");
        }
        slot.deadline = Some(Instant::now() + delay);
        self.shared.wake.notify_one();
    }

    /// Cancel the pending retry. Safe to call when nothing is armed.
    pub fn cancel(&self) {
        let mut slot = lock(&self.shared.slot);
        if slot.deadline.take().is_some() {
            debug!("Pending reconnect cancelled");
            self.shared.wake.notify_one();
        }
    }

    /// Check whether a retry is pending.
    pub fn is_armed(&self) -> bool {
        lock(&self.shared.slot).deadline.is_some()
    }

    /// Number of times the timer has fired.
    pub fn fired_count(&self) -> u64 {
        lock(&self.shared.slot).fired
    }

    /// Cancel any pending retry, stop the thread and wait for it to exit.
    ///
    /// Waits for an in-flight action to notice the stop flag. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut slot = lock(&self.shared.slot);
            slot.shutdown = true;
            slot.deadline = None;
            self.shared.wake.notify_all();
        }

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            // The action may hold the last reference to our owner; never
            // join from the worker itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Reconnect thread panicked");
            }
        }
    }
}

impl Default for ReconnectScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wait_until;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_scheduler() -> (ReconnectScheduler, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let scheduler = ReconnectScheduler::new();
        scheduler
            .start(move |_stopped| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (scheduler, runs)
    }

    #[test]
    fn test_idle_scheduler_never_fires() {
        let (scheduler, runs) = counting_scheduler();
        assert!(!scheduler.is_armed());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_arm_fires_once_after_delay() {
        let (scheduler, runs) = counting_scheduler();
        let start = Instant::now();
        scheduler.arm(Duration::from_millis(40));
        assert!(scheduler.is_armed());

        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1));
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(!scheduler.is_armed());

        thread::sleep(Duration::from_millis(80));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.fired_count(), 1);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let (scheduler, runs) = counting_scheduler();
        scheduler.arm(Duration::from_millis(40));
        scheduler.cancel();
        assert!(!scheduler.is_armed());

        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let (scheduler, _runs) = counting_scheduler();
        scheduler.cancel();
        scheduler.cancel();
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn test_rearm_keeps_single_pending_retry() {
        let (scheduler, runs) = counting_scheduler();
        scheduler.rearm(Duration::from_millis(40));
        scheduler.rearm(Duration::from_millis(40));
        scheduler.rearm(Duration::from_millis(40));
        assert!(scheduler.is_armed());

        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_twice_fails() {
        let (scheduler, _runs) = counting_scheduler();
        let err = scheduler.start(|_stopped| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_arm_before_start_fires_after_start() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let scheduler = ReconnectScheduler::new();
        scheduler.arm(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler
            .start(move |_stopped| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_shutdown_ignores_later_arms() {
        let (scheduler, runs) = counting_scheduler();
        scheduler.shutdown();
        scheduler.arm(Duration::from_millis(1));
        assert!(!scheduler.is_armed());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // Second shutdown is a no-op
        scheduler.shutdown();
    }

    #[test]
    fn test_shutdown_stops_running_action() {
        let scheduler = ReconnectScheduler::new();
        scheduler
            .start(|stopped| {
                while !stopped() {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap();
        scheduler.arm(Duration::ZERO);
        assert!(wait_until(Duration::from_secs(2), || scheduler.fired_count() == 1));

        let start = Instant::now();
        scheduler.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
