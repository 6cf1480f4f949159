#![forbid(unsafe_code)]

//! Virtual-clock scheduler for deterministic tests.
//!
//! Time only moves when [`ManualScheduler::advance`] (or
//! [`advance_to`](ManualScheduler::advance_to)) is called. While advancing,
//! the clock steps to each due timer's deadline before running it, so a
//! callback that reads [`Scheduler::now`] sees exactly the time it was
//! scheduled for.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tickshare_core::Instant;
//! use tickshare_runtime::scheduler::{ManualScheduler, Scheduler};
//!
//! let sched = ManualScheduler::new(Instant::from_epoch_millis(0));
//! let fired_at = Rc::new(Cell::new(None));
//! let seen = Rc::clone(&fired_at);
//! let clock = sched.clone();
//! sched.arm(250, Box::new(move || seen.set(Some(clock.now()))));
//!
//! sched.advance(1_000);
//! assert_eq!(fired_at.get(), Some(Instant::from_epoch_millis(250)));
//! assert_eq!(sched.now(), Instant::from_epoch_millis(1_000));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tickshare_core::Instant;

use super::queue::{PendingTimer, TimerQueue};
use super::{Scheduler, TimerCallback, TimerHandle};

struct ManualState {
    now: Instant,
    queue: TimerQueue,
    armed_delays: Vec<u64>,
    fired: u64,
}

/// A [`Scheduler`] driven by an explicit virtual clock.
///
/// Cloning creates a new handle to the **same** clock and timer queue.
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Rc<RefCell<ManualState>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ManualScheduler")
            .field("now", &inner.now)
            .field("queue", &inner.queue)
            .field("fired", &inner.fired)
            .finish()
    }
}

impl ManualScheduler {
    /// Create a virtual clock starting at `start`.
    #[must_use]
    pub fn new(start: Instant) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ManualState {
                now: start,
                queue: TimerQueue::default(),
                armed_delays: Vec::new(),
                fired: 0,
            })),
        }
    }

    /// Move the clock forward by `ms`, firing every timer that comes due.
    ///
    /// Returns the number of timers fired.
    pub fn advance(&self, ms: u64) -> usize {
        let target = self
            .now()
            .saturating_add_millis(i64::try_from(ms).unwrap_or(i64::MAX));
        self.advance_to(target)
    }

    /// Move the clock forward to `target`, firing every timer due on the way.
    ///
    /// A `target` in the past fires nothing and leaves the clock alone.
    pub fn advance_to(&self, target: Instant) -> usize {
        let mut fired = 0;
        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();
                match inner.queue.pop_due(target) {
                    Some((deadline, callback)) => {
                        if deadline > inner.now {
                            inner.now = deadline;
                        }
                        inner.fired += 1;
                        Some(callback)
                    }
                    None => None,
                }
            };
            match due {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }
        let mut inner = self.inner.borrow_mut();
        if target > inner.now {
            inner.now = target;
        }
        fired
    }

    /// Move the clock forward by `ms` without firing anything, as when the
    /// host was suspended. Overdue timers fire on the next `advance` or
    /// `run_pending`.
    pub fn stall(&self, ms: u64) {
        let mut inner = self.inner.borrow_mut();
        inner.now = inner
            .now
            .saturating_add_millis(i64::try_from(ms).unwrap_or(i64::MAX));
    }

    /// Fire every timer already due at the current time.
    pub fn run_pending(&self) -> usize {
        let now = self.now();
        self.advance_to(now)
    }

    /// Timers armed but not yet fired, earliest first.
    #[must_use]
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.inner.borrow().queue.pending()
    }

    /// Every delay passed to `arm`, in order.
    #[must_use]
    pub fn armed_delays(&self) -> Vec<u64> {
        self.inner.borrow().armed_delays.clone()
    }

    /// Total timers fired since creation.
    #[must_use]
    pub fn fired_count(&self) -> u64 {
        self.inner.borrow().fired
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.inner.borrow().now
    }

    fn arm(&self, delay_ms: u64, callback: TimerCallback) -> TimerHandle {
        let mut inner = self.inner.borrow_mut();
        let now = inner.now;
        inner.armed_delays.push(delay_ms);
        inner.queue.insert(now, delay_ms, callback)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.inner.borrow_mut().queue.cancel(handle);
    }
}
