// blocking primitives of the synchronization core.
//
// waits follow a deadline-driven condvar loop. there is no waker machinery: waiters are plain
// threads parked directly on the core's conditions.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::{Duration, Instant},
};


/// Limit on how long a read or write may block
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Deadline {
    /// Block for as long as it takes
    Never,
    /// Stop blocking at the given instant
    At(Instant),
    /// Never block, only do what can be done immediately
    NonBlocking,
}

impl Deadline {
    /// Deadline the given duration from now
    pub fn after(timeout: Duration) -> Self {
        Deadline::At(Instant::now() + timeout)
    }
}

// reason a wait returned without the caller's predicate necessarily holding, other than a plain
// wakeup.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Stop {
    Interrupted,
    TimedOut,
}

// lock a mutex, recovering from poisoning.
//
// channel state is only mutated by code that can't panic part-way through, so a poisoned lock
// still guards consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// release the lock, sleep on cond, re-acquire the lock.
//
// returns err without sleeping if the interrupt flag is raised (consuming it) or the deadline has
// passed. returning ok means only that the thread woke up: the conditions are broadcast for every
// channel, so the caller must re-check its own channel's predicate before acting.
pub(crate) fn wait<'a, T>(
    guard: MutexGuard<'a, T>,
    cond: &Condvar,
    interrupt: &Interrupt,
    deadline: Deadline,
) -> (MutexGuard<'a, T>, Result<(), Stop>) {
    // the flag is checked under the lock, and raising it broadcasts under the lock, so an
    // interrupt can't slip in between this check and going to sleep
    if interrupt.take() {
        return (guard, Err(Stop::Interrupted));
    }
    match deadline {
        Deadline::Never => {
            let guard = cond.wait(guard).unwrap_or_else(PoisonError::into_inner);
            (guard, Ok(()))
        }
        Deadline::At(deadline) => {
            let Some(duration) = deadline
                .checked_duration_since(Instant::now())
                .filter(|duration| !duration.is_zero())
                else { return (guard, Err(Stop::TimedOut)) };
            let (guard, _) = cond
                .wait_timeout(guard, duration)
                .unwrap_or_else(PoisonError::into_inner);
            // a timeout is noticed by the next call, after the caller re-checks its predicate
            (guard, Ok(()))
        }
        Deadline::NonBlocking => (guard, Err(Stop::TimedOut)),
    }
}


// per-handle interruption flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    // lower the flag, returning whether it was raised.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

// something with conditions that interrupted waiters may be sleeping on.
pub(crate) trait Broadcast: Send + Sync {
    // wake every waiter on every condition, notifying under the lock.
    fn broadcast_all(&self);
}

/// Cancels blocked operations on a [`Handle`](crate::Handle)
///
/// Raising the interrupt makes a read or write that is blocked on the handle (or the next one
/// to block) return [`Error::Interrupted`](crate::Error::Interrupted). The interrupt is consumed
/// by the operation that observes it. Operations that never need to block are unaffected.
#[derive(Clone)]
pub struct Interrupter {
    interrupt: Interrupt,
    core: Arc<dyn Broadcast>,
}

impl Interrupter {
    pub(crate) fn new(interrupt: Interrupt, core: Arc<dyn Broadcast>) -> Self {
        Interrupter { interrupt, core }
    }

    /// Interrupt the handle's blocked operation
    pub fn interrupt(&self) {
        self.interrupt.raise();
        self.core.broadcast_all();
    }

    // lower a pending interrupt that no wait has consumed, returning whether one was pending.
    pub(crate) fn withdraw(&self) -> bool {
        self.interrupt.take()
    }
}
