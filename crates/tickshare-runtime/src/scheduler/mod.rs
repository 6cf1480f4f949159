#![forbid(unsafe_code)]

//! Scheduler adapter: one-shot delayed callbacks plus a clock.
//!
//! The engine never talks to a host timer directly. It goes through
//! [`Scheduler`], which has exactly three operations: read the clock, arm a
//! one-shot callback, and cancel one. Two implementations ship here:
//!
//! - [`ManualScheduler`]: a virtual clock advanced explicitly by tests.
//! - [`SystemScheduler`]: the wall clock, serviced by a host loop.
//!
//! Both keep pending timers in the same deadline-ordered queue, so timer
//! ordering is identical whichever one drives the engine.
//!
//! # Invariants
//!
//! 1. Timers fire in deadline order; equal deadlines fire in arming order.
//! 2. A timer fires at most once.
//! 3. Cancelling a fired, cancelled, or unknown handle is a no-op.
//! 4. No scheduler borrow is held while a callback runs, so callbacks may
//!    arm and cancel freely.

mod manual;
mod queue;
mod system;

pub use manual::ManualScheduler;
pub use queue::PendingTimer;
pub use system::SystemScheduler;

use tickshare_core::Instant;

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce()>;

/// Opaque identity of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Raw id, unique per scheduler.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Host timer primitive used by the engine.
///
/// Methods take `&self`; implementations use interior mutability because the
/// engine and the timers it arms share one scheduler on one thread.
pub trait Scheduler {
    /// Current time according to this scheduler.
    fn now(&self) -> Instant;

    /// Run `callback` once, `delay_ms` milliseconds from [`now`](Self::now).
    fn arm(&self, delay_ms: u64, callback: TimerCallback) -> TimerHandle;

    /// Cancel a pending timer. Safe on handles that already fired or were
    /// already cancelled.
    fn cancel(&self, handle: TimerHandle);
}
