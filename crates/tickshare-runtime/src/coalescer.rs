#![forbid(unsafe_code)]

//! Interval coalescer: one timer for every registration.
//!
//! The coalescer owns the single armed [`TimerHandle`] and the time of the
//! last tick. Whenever the registration set changes it decides, through the
//! pure [`plan`] function, whether the running timer is kept, replaced, or
//! cancelled, or whether a tick must happen right now.
//!
//! # Algorithm
//!
//! With `effective = max(floor, min(requested intervals))`:
//!
//! 1. No registrations, or only idle ones: cancel the timer.
//! 2. First registration: refresh the snapshot silently, then arm a full
//!    period.
//! 3. A registration whose (clamped) interval is `<=` the time since the
//!    last tick: tick now.
//! 4. Effective period unchanged: keep the running timer.
//! 5. Otherwise re-arm for `effective - elapsed`, never a full restart; if
//!    that is already zero, tick now. After the catch-up tick the timer runs
//!    at the full period again.
//!
//! After a tick the timer is re-armed once its callbacks have run, for the
//! period minus the time spent since the tick, so slow callbacks do not
//! stretch the cadence.
//!
//! # Invariants
//!
//! 1. At most one timer is armed; arming always cancels the previous one.
//! 2. An armed timer's period equals the current effective interval.

use std::num::NonZeroU64;

use tickshare_core::{Instant, RefreshInterval};

use crate::scheduler::TimerHandle;

/// What happened to the registration set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySetChange {
    /// A registration became live.
    Added {
        /// The new registration's interval, floor already applied.
        interval: RefreshInterval,
        /// Whether the registry was empty before this one.
        first: bool,
    },
    /// A registration was removed.
    Removed,
}

/// Timer action chosen by [`plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPlan {
    /// Stop ticking.
    Cancel,
    /// Leave the running timer alone.
    Keep,
    /// Refresh the snapshot without notifying, then arm a full period.
    PrimeAndArm {
        /// Period to tick at.
        period: u64,
    },
    /// Replace the timer with a one-shot of `delay`, then tick at `period`.
    Arm {
        /// Time until the next tick.
        delay: u64,
        /// Period the timer serves.
        period: u64,
    },
    /// Tick immediately; the tick re-arms.
    TickNow,
}

/// Decide the timer action for a registration-set change.
///
/// `armed_period` is the period of the currently armed timer, if any, and
/// `elapsed_ms` the time since the last tick.
#[must_use]
pub fn plan(
    change: RegistrySetChange,
    effective: Option<RefreshInterval>,
    armed_period: Option<u64>,
    elapsed_ms: u64,
) -> TimerPlan {
    let Some(period) = effective.and_then(RefreshInterval::as_millis) else {
        return TimerPlan::Cancel;
    };
    if let RegistrySetChange::Added { interval, first } = change {
        if first {
            return TimerPlan::PrimeAndArm { period };
        }
        if let Some(requested) = interval.as_millis()
            && requested <= elapsed_ms
        {
            return TimerPlan::TickNow;
        }
    }
    if armed_period == Some(period) {
        return TimerPlan::Keep;
    }
    match period.saturating_sub(elapsed_ms) {
        0 => TimerPlan::TickNow,
        delay => TimerPlan::Arm { delay, period },
    }
}

/// Timer action once a tick's callbacks have run, `elapsed_ms` after the
/// tick: the rest of the period, or nothing.
#[must_use]
pub fn plan_after_tick(effective: Option<RefreshInterval>, elapsed_ms: u64) -> TimerPlan {
    match effective.and_then(RefreshInterval::as_millis) {
        Some(period) => TimerPlan::Arm {
            delay: period.saturating_sub(elapsed_ms),
            period,
        },
        None => TimerPlan::Cancel,
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    handle: TimerHandle,
    period: u64,
}

/// Timer ownership and tick bookkeeping.
#[derive(Debug, Clone)]
pub struct Coalescer {
    floor: NonZeroU64,
    timer: Option<ArmedTimer>,
    last_tick: Instant,
}

impl Coalescer {
    /// Create with the engine floor; `origin` stands in for the last tick
    /// until the first real one.
    #[must_use]
    pub fn new(floor: NonZeroU64, origin: Instant) -> Self {
        Self {
            floor,
            timer: None,
            last_tick: origin,
        }
    }

    /// Minimum refresh interval applied to every request.
    #[must_use]
    pub fn floor(&self) -> NonZeroU64 {
        self.floor
    }

    /// When the snapshot was last refreshed by a tick or first registration.
    #[must_use]
    pub fn last_tick(&self) -> Instant {
        self.last_tick
    }

    /// Milliseconds since the last tick; a clock that went backwards counts
    /// as zero.
    #[must_use]
    pub fn elapsed_since_tick(&self, now: Instant) -> u64 {
        u64::try_from(now.millis_since(self.last_tick)).unwrap_or(0)
    }

    /// Period of the armed timer, if any.
    #[must_use]
    pub fn armed_period(&self) -> Option<u64> {
        self.timer.map(|t| t.period)
    }

    /// Plan for a registration-set change given the new effective interval.
    #[must_use]
    pub fn plan(
        &self,
        change: RegistrySetChange,
        effective: Option<RefreshInterval>,
        now: Instant,
    ) -> TimerPlan {
        plan(
            change,
            effective,
            self.armed_period(),
            self.elapsed_since_tick(now),
        )
    }

    /// Record a tick (or silent first refresh) at `now`.
    pub fn mark_tick(&mut self, now: Instant) {
        self.last_tick = now;
    }

    /// Take ownership of the armed handle so the caller can cancel it.
    pub fn take_timer(&mut self) -> Option<TimerHandle> {
        self.timer.take().map(|t| t.handle)
    }

    /// Record a newly armed timer. The previous one must already be taken.
    pub fn set_timer(&mut self, handle: TimerHandle, period: u64) {
        debug_assert!(self.timer.is_none(), "previous timer not cancelled");
        self.timer = Some(ArmedTimer { handle, period });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn every(ms: u64) -> RefreshInterval {
        RefreshInterval::from_millis(ms).expect("non-zero")
    }

    fn added(ms: u64) -> RegistrySetChange {
        RegistrySetChange::Added {
            interval: every(ms),
            first: false,
        }
    }

    #[test]
    fn empty_or_idle_cancels() {
        assert_eq!(
            plan(RegistrySetChange::Removed, None, Some(500), 10),
            TimerPlan::Cancel
        );
        assert_eq!(
            plan(
                RegistrySetChange::Added {
                    interval: RefreshInterval::Idle,
                    first: true,
                },
                Some(RefreshInterval::Idle),
                None,
                0,
            ),
            TimerPlan::Cancel
        );
    }

    #[test]
    fn first_registration_primes() {
        let change = RegistrySetChange::Added {
            interval: every(1_000),
            first: true,
        };
        assert_eq!(
            plan(change, Some(every(1_000)), None, 5_000),
            TimerPlan::PrimeAndArm { period: 1_000 }
        );
    }

    #[test]
    fn slower_addition_keeps_timer() {
        assert_eq!(
            plan(added(60_000), Some(every(1_000)), Some(1_000), 300),
            TimerPlan::Keep
        );
    }

    #[test]
    fn addition_within_elapsed_ticks_now() {
        assert_eq!(
            plan(added(500), Some(every(500)), Some(1_000), 700),
            TimerPlan::TickNow
        );
        assert_eq!(
            plan(added(500), Some(every(500)), Some(1_000), 500),
            TimerPlan::TickNow
        );
    }

    #[test]
    fn faster_addition_preserves_progress() {
        assert_eq!(
            plan(added(500), Some(every(500)), Some(1_000), 300),
            TimerPlan::Arm {
                delay: 200,
                period: 500,
            }
        );
    }

    #[test]
    fn removing_fastest_arms_remaining_delta() {
        assert_eq!(
            plan(RegistrySetChange::Removed, Some(every(1_000)), Some(500), 450),
            TimerPlan::Arm {
                delay: 550,
                period: 1_000,
            }
        );
    }

    #[test]
    fn removing_fastest_after_slower_period_ticks_now() {
        assert_eq!(
            plan(RegistrySetChange::Removed, Some(every(1_000)), None, 1_200),
            TimerPlan::TickNow
        );
    }

    #[test]
    fn removing_other_keeps_timer() {
        assert_eq!(
            plan(RegistrySetChange::Removed, Some(every(500)), Some(500), 450),
            TimerPlan::Keep
        );
    }

    #[test]
    fn after_tick_plans_full_period() {
        assert_eq!(
            plan_after_tick(Some(every(250)), 0),
            TimerPlan::Arm {
                delay: 250,
                period: 250,
            }
        );
        assert_eq!(plan_after_tick(Some(RefreshInterval::Idle), 0), TimerPlan::Cancel);
        assert_eq!(plan_after_tick(None, 0), TimerPlan::Cancel);
    }

    #[test]
    fn after_slow_delivery_plans_the_remainder() {
        assert_eq!(
            plan_after_tick(Some(every(250)), 40),
            TimerPlan::Arm {
                delay: 210,
                period: 250,
            }
        );
        assert_eq!(
            plan_after_tick(Some(every(250)), 900),
            TimerPlan::Arm {
                delay: 0,
                period: 250,
            }
        );
    }

    #[test]
    fn coalescer_tracks_timer_ownership() {
        let floor = NonZeroU64::new(200).expect("non-zero");
        let mut c = Coalescer::new(floor, Instant::from_epoch_millis(0));
        assert_eq!(c.armed_period(), None);
        assert_eq!(c.elapsed_since_tick(Instant::from_epoch_millis(-50)), 0);
        assert_eq!(c.elapsed_since_tick(Instant::from_epoch_millis(300)), 300);

        let scheduler = crate::scheduler::ManualScheduler::new(Instant::from_epoch_millis(0));
        let handle = crate::scheduler::Scheduler::arm(&scheduler, 500, Box::new(|| {}));
        c.set_timer(handle, 500);
        assert_eq!(c.armed_period(), Some(500));
        assert_eq!(c.take_timer(), Some(handle));
        assert_eq!(c.take_timer(), None);
        assert_eq!(c.armed_period(), None);
    }

    proptest! {
        #[test]
        fn armed_period_always_matches_effective(
            effective in 1u64..100_000,
            armed in proptest::option::of(1u64..100_000),
            elapsed in 0u64..200_000,
        ) {
            match plan(RegistrySetChange::Removed, Some(every(effective)), armed, elapsed) {
                TimerPlan::Keep => prop_assert_eq!(armed, Some(effective)),
                TimerPlan::Arm { delay, period } => {
                    prop_assert_eq!(period, effective);
                    prop_assert_eq!(delay, effective - elapsed);
                }
                TimerPlan::TickNow => prop_assert!(elapsed >= effective),
                other => prop_assert!(false, "unexpected plan {:?}", other),
            }
        }
    }
}
