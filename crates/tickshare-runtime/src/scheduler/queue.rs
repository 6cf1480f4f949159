#![forbid(unsafe_code)]

//! Deadline-ordered one-shot timer queue shared by the schedulers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tickshare_core::Instant;

use super::{TimerCallback, TimerHandle};

/// A timer that has been armed but has not fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    /// Handle returned by `arm`.
    pub handle: TimerHandle,
    /// When the timer fires.
    pub deadline: Instant,
    /// Delay it was armed with.
    pub delay_ms: u64,
}

struct Entry {
    delay_ms: u64,
    callback: TimerCallback,
}

/// Timers keyed by `(deadline, id)`; ids grow monotonically so ties fire in
/// arming order.
#[derive(Default)]
pub(crate) struct TimerQueue {
    next_id: u64,
    timers: BTreeMap<(Instant, u64), Entry>,
    deadlines: HashMap<u64, Instant>,
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.timers.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, now: Instant, delay_ms: u64, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = now.saturating_add_millis(i64::try_from(delay_ms).unwrap_or(i64::MAX));
        self.timers.insert((deadline, id), Entry { delay_ms, callback });
        self.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    /// Returns whether a pending timer was removed.
    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(deadline) => self.timers.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(Instant, TimerCallback)> {
        let (&(deadline, id), _) = self.timers.first_key_value()?;
        if deadline > now {
            return None;
        }
        let entry = self.timers.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((deadline, entry.callback))
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.first_key_value().map(|(&(deadline, _), _)| deadline)
    }

    pub(crate) fn pending(&self) -> Vec<PendingTimer> {
        self.timers
            .iter()
            .map(|(&(deadline, id), entry)| PendingTimer {
                handle: TimerHandle(id),
                deadline,
                delay_ms: entry.delay_ms,
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}
