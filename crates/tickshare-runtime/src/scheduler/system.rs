#![forbid(unsafe_code)]

//! Wall-clock scheduler serviced by the host's own loop.
//!
//! There is no background thread. The host either blocks in
//! [`SystemScheduler::run_for`], or folds [`next_timeout`] into its own event
//! loop's poll timeout and calls [`run_pending`] after each wake-up.
//!
//! [`next_timeout`]: SystemScheduler::next_timeout
//! [`run_pending`]: SystemScheduler::run_pending

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tickshare_core::Instant;
use tickshare_core::trace;
use web_time::Duration;

use super::queue::{PendingTimer, TimerQueue};
use super::{Scheduler, TimerCallback, TimerHandle};

/// A [`Scheduler`] backed by the system clock.
///
/// Cloning creates a new handle to the **same** timer queue.
#[derive(Clone, Default)]
pub struct SystemScheduler {
    queue: Rc<RefCell<TimerQueue>>,
}

impl fmt::Debug for SystemScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemScheduler")
            .field("queue", &self.queue.borrow())
            .finish()
    }
}

impl SystemScheduler {
    /// Create a scheduler with no pending timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How long the host may sleep before the next timer is due.
    ///
    /// `None` when nothing is pending; `Some(Duration::ZERO)` when a timer is
    /// already overdue.
    #[must_use]
    pub fn next_timeout(&self) -> Option<Duration> {
        let deadline = self.queue.borrow().next_deadline()?;
        let remaining = deadline.millis_since(Instant::now());
        Some(Duration::from_millis(u64::try_from(remaining).unwrap_or(0)))
    }

    /// Fire every timer that is due now. Returns how many fired.
    pub fn run_pending(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = Instant::now();
            let due = self.queue.borrow_mut().pop_due(now);
            match due {
                Some((_, callback)) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }
        if fired > 0 {
            trace!(fired, "system scheduler fired timers");
        }
        fired
    }

    /// Block the current thread for `duration`, firing timers as they come
    /// due. Returns how many fired.
    pub fn run_for(&self, duration: Duration) -> usize {
        let end = web_time::Instant::now() + duration;
        let mut fired = 0;
        loop {
            fired += self.run_pending();
            let remaining = end.saturating_duration_since(web_time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let sleep = self.next_timeout().map_or(remaining, |t| t.min(remaining));
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
        }
        fired
    }

    /// Timers armed but not yet fired, earliest first.
    #[must_use]
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.queue.borrow().pending()
    }
}

impl Scheduler for SystemScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn arm(&self, delay_ms: u64, callback: TimerCallback) -> TimerHandle {
        self.queue
            .borrow_mut()
            .insert(Instant::now(), delay_ms, callback)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.queue.borrow_mut().cancel(handle);
    }
}
