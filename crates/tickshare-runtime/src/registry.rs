#![forbid(unsafe_code)]

//! Subscription registry: one entry per `subscribe` call.
//!
//! # Design
//!
//! Lifecycle and fan-out use two different keys. Every registration gets a
//! synthetic [`RegistrationId`], so two registrations sharing a callback (or
//! an interval) are added and removed independently. When notifying, the
//! registry collapses the selected registrations by **callback identity**,
//! so a callback registered twice is still invoked once per round.
//!
//! Callback identity is the allocation behind an [`UpdateCallback`]: clones
//! share it, separately constructed callbacks never do.
//!
//! # Cadence bookkeeping
//!
//! Each registration carries a `baseline`, the instant its own interval is
//! measured from. A registration is *due* once `now - baseline` reaches its
//! (floor-clamped) interval. Notifying it through a tick advances the
//! baseline by one period, not to the tick, so a cadence that is not a
//! multiple of the tick period keeps its requested average rate. A
//! registration more than one period behind is rebased to the tick instead.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroU64;
use std::rc::Rc;

use tickshare_core::{Instant, IntervalParameter, InvalidIntervalError, RefreshInterval};

use crate::notifier::FanOut;

/// A subscriber callback. Cloning preserves identity.
#[derive(Clone)]
pub struct UpdateCallback(Rc<dyn Fn(&Instant)>);

impl UpdateCallback {
    /// Wrap a closure. Each call creates a distinct identity.
    pub fn new(f: impl Fn(&Instant) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke with a snapshot.
    #[inline]
    pub fn call(&self, snapshot: &Instant) {
        (self.0)(snapshot);
    }

    /// Whether both handles refer to the same callback.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }

    fn identity(&self) -> *const () {
        Rc::as_ptr(&self.0).cast::<()>()
    }
}

impl<F: Fn(&Instant) + 'static> From<F> for UpdateCallback {
    fn from(f: F) -> Self {
        Self::new(f)
    }
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpdateCallback").field(&self.identity()).finish()
    }
}

/// Identity of one registration, distinct from its callback's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// Raw id, unique per engine.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg#{}", self.0)
    }
}

/// One live `subscribe` call.
#[derive(Debug, Clone)]
pub struct Registration {
    id: RegistrationId,
    callback: UpdateCallback,
    interval: RefreshInterval,
    baseline: Instant,
}

impl Registration {
    /// This registration's identity.
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// The interval as requested, before the engine floor is applied.
    #[must_use]
    pub fn interval(&self) -> RefreshInterval {
        self.interval
    }

    /// The instant this registration's cadence is measured from.
    #[must_use]
    pub fn baseline(&self) -> Instant {
        self.baseline
    }

    /// Measure this registration's cadence from `baseline` instead.
    pub(crate) fn rebase(&mut self, baseline: Instant) {
        self.baseline = baseline;
    }

    /// If due at `now`, move the baseline past this period and return true.
    fn take_due(&mut self, now: Instant, floor: NonZeroU64) -> bool {
        let Some(period) = self.interval.clamp_to(floor).as_millis() else {
            return false;
        };
        let Ok(elapsed) = u64::try_from(now.millis_since(self.baseline)) else {
            return false;
        };
        if elapsed < period {
            return false;
        }
        self.baseline = if elapsed >= period.saturating_mul(2) {
            now
        } else {
            self.baseline
                .saturating_add_millis(i64::try_from(period).unwrap_or(i64::MAX))
        };
        true
    }
}

/// Every live registration, in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    next_id: u64,
    entries: Vec<Registration>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a request and allocate its id without making it live.
    ///
    /// Used when the registration set cannot change yet (mid fan-out); the
    /// result is made live later with [`insert`](Self::insert).
    pub fn reserve(
        &mut self,
        callback: UpdateCallback,
        requested_interval_ms: f64,
        baseline: Instant,
    ) -> Result<Registration, InvalidIntervalError> {
        let interval =
            RefreshInterval::parse(requested_interval_ms, IntervalParameter::TargetRefreshInterval)?;
        let id = RegistrationId(self.next_id);
        self.next_id += 1;
        Ok(Registration {
            id,
            callback,
            interval,
            baseline,
        })
    }

    /// Make a reserved registration live.
    pub fn insert(&mut self, registration: Registration) {
        self.entries.push(registration);
    }

    /// Validate and add a registration in one step.
    pub fn add(
        &mut self,
        callback: UpdateCallback,
        requested_interval_ms: f64,
        baseline: Instant,
    ) -> Result<RegistrationId, InvalidIntervalError> {
        let registration = self.reserve(callback, requested_interval_ms, baseline)?;
        let id = registration.id;
        self.insert(registration);
        Ok(id)
    }

    /// Remove a registration. Unknown ids are ignored.
    pub fn remove(&mut self, id: RegistrationId) -> Option<Registration> {
        let index = self.entries.iter().position(|r| r.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Whether no registrations are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether `id` is live.
    #[must_use]
    pub fn contains(&self, id: RegistrationId) -> bool {
        self.entries.iter().any(|r| r.id == id)
    }

    /// Look up a live registration.
    #[must_use]
    pub fn get(&self, id: RegistrationId) -> Option<&Registration> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Fastest requested interval, unclamped. `None` when empty.
    #[must_use]
    pub fn minimum_live_interval(&self) -> Option<RefreshInterval> {
        self.entries.iter().map(|r| r.interval).min()
    }

    /// Fastest requested interval raised to `floor`. `None` when empty.
    #[must_use]
    pub fn effective_interval(&self, floor: NonZeroU64) -> Option<RefreshInterval> {
        self.minimum_live_interval().map(|i| i.clamp_to(floor))
    }

    /// Every live registration, each distinct callback once.
    #[must_use]
    pub fn notify_all(&self, snapshot: Instant) -> FanOut {
        FanOut::new(snapshot, dedup_callbacks(self.entries.iter()))
    }

    /// Registrations due at `now`, each distinct callback once. Their
    /// baselines advance by one period.
    pub fn notify_due(&mut self, now: Instant, floor: NonZeroU64) -> FanOut {
        let due: Vec<bool> = self
            .entries
            .iter_mut()
            .map(|registration| registration.take_due(now, floor))
            .collect();
        let selected = self
            .entries
            .iter()
            .zip(due)
            .filter_map(|(registration, due)| due.then_some(registration));
        FanOut::new(now, dedup_callbacks(selected))
    }
}

fn dedup_callbacks<'a>(registrations: impl Iterator<Item = &'a Registration>) -> Vec<UpdateCallback> {
    let mut seen = HashSet::new();
    registrations
        .filter(|r| seen.insert(r.callback.identity()))
        .map(|r| r.callback.clone())
        .collect()
}
