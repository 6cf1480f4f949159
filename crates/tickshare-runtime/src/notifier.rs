#![forbid(unsafe_code)]

//! Notifier: owner of the shared snapshot.
//!
//! The snapshot is replaced, never mutated, and every reader gets a copy. In
//! [`NotifyMode::Auto`] a refresh and its fan-out happen in the same engine
//! step. In [`NotifyMode::Manual`] a refresh only raises the pending-update
//! flag; callbacks run when the host calls `flush`.
//!
//! Callbacks are never invoked while engine state is borrowed: the engine
//! builds a [`FanOut`] (snapshot plus deduplicated callbacks), releases its
//! borrow, then calls [`FanOut::deliver`].

use std::fmt;

use tickshare_core::Instant;

use crate::registry::UpdateCallback;

/// When refreshed snapshots reach subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotifyMode {
    /// Every tick notifies the registrations it made due.
    #[default]
    Auto,
    /// Ticks only mark the snapshot as pending; `flush` notifies.
    Manual,
}

impl NotifyMode {
    /// Mode for the `auto_notify_after_state_update` flag.
    #[must_use]
    pub const fn from_auto_flag(auto_notify: bool) -> Self {
        if auto_notify { Self::Auto } else { Self::Manual }
    }
}

/// Snapshot owner.
#[derive(Debug, Clone)]
pub struct Notifier {
    snapshot: Instant,
    pending_update: bool,
    mode: NotifyMode,
}

impl Notifier {
    /// Start with `initial` as the snapshot and nothing pending.
    #[must_use]
    pub fn new(initial: Instant, mode: NotifyMode) -> Self {
        Self {
            snapshot: initial,
            pending_update: false,
            mode,
        }
    }

    /// The current snapshot. Never refreshes.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Instant {
        self.snapshot
    }

    /// Configured mode.
    #[must_use]
    pub fn mode(&self) -> NotifyMode {
        self.mode
    }

    /// Whether the snapshot changed since the last fan-out (manual mode only).
    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.pending_update
    }

    /// Replace the snapshot with `now`.
    ///
    /// In manual mode a changed value raises the pending flag. Returns whether
    /// the value changed.
    pub fn refresh(&mut self, now: Instant) -> bool {
        let changed = self.snapshot != now;
        self.snapshot = now;
        if changed && self.mode == NotifyMode::Manual {
            self.pending_update = true;
        }
        changed
    }

    /// Record that the current snapshot was fanned out.
    pub fn mark_delivered(&mut self) {
        self.pending_update = false;
    }
}

/// A prepared notification round: one snapshot, each callback once.
#[must_use = "a FanOut does nothing until delivered"]
pub struct FanOut {
    snapshot: Instant,
    callbacks: Vec<UpdateCallback>,
}

impl FanOut {
    pub(crate) fn new(snapshot: Instant, callbacks: Vec<UpdateCallback>) -> Self {
        Self {
            snapshot,
            callbacks,
        }
    }

    /// A round that notifies nobody.
    pub fn empty(snapshot: Instant) -> Self {
        Self::new(snapshot, Vec::new())
    }

    /// The snapshot every callback in this round receives.
    #[must_use]
    pub fn snapshot(&self) -> Instant {
        self.snapshot
    }

    /// Number of callbacks in this round.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether this round notifies nobody.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invoke every callback, in order, with the same snapshot.
    pub fn deliver(self) {
        for callback in &self.callbacks {
            callback.call(&self.snapshot);
        }
    }
}

impl fmt::Debug for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOut")
            .field("snapshot", &self.snapshot)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn at(ms: i64) -> Instant {
        Instant::from_epoch_millis(ms)
    }

    #[test]
    fn auto_mode_never_pends() {
        let mut n = Notifier::new(at(0), NotifyMode::Auto);
        assert!(n.refresh(at(1_000)));
        assert_eq!(n.snapshot(), at(1_000));
        assert!(!n.has_pending_update());
    }

    #[test]
    fn manual_mode_pends_until_delivered() {
        let mut n = Notifier::new(at(0), NotifyMode::Manual);
        assert!(!n.refresh(at(0)));
        assert!(!n.has_pending_update());
        assert!(n.refresh(at(1_000)));
        assert!(n.has_pending_update());
        n.mark_delivered();
        assert!(!n.has_pending_update());
    }

    #[test]
    fn mode_from_flag() {
        assert_eq!(NotifyMode::from_auto_flag(true), NotifyMode::Auto);
        assert_eq!(NotifyMode::from_auto_flag(false), NotifyMode::Manual);
        assert_eq!(NotifyMode::default(), NotifyMode::Auto);
    }

    #[test]
    fn fan_out_delivers_identical_snapshot() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let callbacks = (0..3)
            .map(|_| {
                let seen = Rc::clone(&seen);
                UpdateCallback::new(move |t| seen.borrow_mut().push(*t))
            })
            .collect();
        let round = FanOut::new(at(42), callbacks);
        assert_eq!(round.len(), 3);
        round.deliver();
        assert_eq!(*seen.borrow(), vec![at(42); 3]);
    }

    #[test]
    fn empty_round() {
        let round = FanOut::empty(at(0));
        assert!(round.is_empty());
        round.deliver();
    }
}
