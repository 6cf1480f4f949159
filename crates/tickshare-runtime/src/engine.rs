#![forbid(unsafe_code)]

//! The shared clock: one snapshot, one timer, many subscribers.
//!
//! # Design
//!
//! [`SharedClock`] ties the pieces together. The registry records who is
//! subscribed, the coalescer keeps a single timer at the fastest requested
//! cadence, and the notifier owns the snapshot. All of it lives behind one
//! `Rc<RefCell<..>>`; timer callbacks and [`Subscription`] handles hold
//! `Weak` references, so neither keeps a dropped engine alive.
//!
//! # Re-entrancy
//!
//! Subscriber callbacks run with no engine borrow held, so they may call any
//! method. `subscribe`, `unsubscribe` and `flush` issued while a fan-out is
//! in progress are queued and applied, in order, once it completes; the
//! registration set never changes mid-round. A tick re-arms the timer only
//! after its callbacks have run, ahead of any queued operation.
//!
//! # Failure Modes
//!
//! - **Callback owns the clock**: a callback that captures a `SharedClock`
//!   clone forms an `Rc` cycle and keeps the engine alive until its
//!   subscription is dropped.
//! - **Callback panics**: the panic propagates out of the tick (or `flush`)
//!   and the rest of that round's callbacks are skipped. Queued
//!   subscriptions, unsubscriptions and the timer re-arm are still applied
//!   while unwinding, without notifying anyone; a queued `flush` is dropped.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tickshare_core::{Instant, ONE_SECOND};
//! use tickshare_runtime::{ClockConfig, ManualScheduler, SharedClock, SubscribeOptions};
//!
//! let scheduler = Rc::new(ManualScheduler::new(Instant::from_epoch_millis(0)));
//! let clock = SharedClock::new(ClockConfig::default(), scheduler.clone())?;
//!
//! let ticks = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&ticks);
//! let _sub = clock.subscribe(SubscribeOptions::new(
//!     move |_now: &Instant| seen.set(seen.get() + 1),
//!     ONE_SECOND,
//! ))?;
//!
//! scheduler.advance(3_000);
//! assert_eq!(ticks.get(), 3);
//! assert_eq!(clock.state_snapshot(), Instant::from_epoch_millis(3_000));
//! # Ok::<(), tickshare_core::InvalidIntervalError>(())
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU64;
use std::rc::{Rc, Weak};

use tickshare_core::{Instant, InvalidIntervalError, RefreshInterval};
use tickshare_core::{debug, debug_span, trace};

use crate::coalescer::{Coalescer, RegistrySetChange, TimerPlan, plan_after_tick};
use crate::config::ClockConfig;
use crate::notifier::{FanOut, Notifier, NotifyMode};
use crate::registry::{Registration, RegistrationId, Registry, UpdateCallback};
use crate::scheduler::Scheduler;

/// Arguments to [`SharedClock::subscribe`].
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Called with the snapshot whenever this subscription is notified.
    pub on_update: UpdateCallback,
    /// Requested cadence in milliseconds, or [`IDLE`](tickshare_core::IDLE).
    pub target_refresh_interval_ms: f64,
}

impl SubscribeOptions {
    /// Subscribe `on_update` at `target_refresh_interval_ms`.
    pub fn new(on_update: impl Into<UpdateCallback>, target_refresh_interval_ms: f64) -> Self {
        Self {
            on_update: on_update.into(),
            target_refresh_interval_ms,
        }
    }
}

/// Work postponed until the current fan-out completes.
enum Deferred {
    Add(Registration),
    Remove(RegistrationId),
    Flush,
    Tick,
    /// Arm the timer for the rest of the period after a tick's fan-out.
    Rearm,
}

struct EngineState {
    registry: Registry,
    coalescer: Coalescer,
    notifier: Notifier,
    delivering: bool,
    deferred: VecDeque<Deferred>,
}

impl EngineState {
    fn effective_interval(&self) -> Option<RefreshInterval> {
        self.registry.effective_interval(self.coalescer.floor())
    }
}

struct Shared {
    state: RefCell<EngineState>,
    scheduler: Rc<dyn Scheduler>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().coalescer.take_timer() {
            self.scheduler.cancel(handle);
        }
    }
}

/// A coalescing shared clock.
///
/// Cloning creates a new handle to the **same** engine.
///
/// # Invariants
///
/// 1. Exactly one snapshot exists; it is replaced, never mutated.
/// 2. At most one timer is armed, at `max(floor, fastest request)`.
/// 3. Each callback runs at most once per notification round, however many
///    registrations share it.
/// 4. With no subscribers the snapshot never changes.
#[derive(Clone)]
pub struct SharedClock {
    shared: Rc<Shared>,
}

impl fmt::Debug for SharedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("SharedClock")
            .field("snapshot", &state.notifier.snapshot())
            .field("mode", &state.notifier.mode())
            .field("registrations", &state.registry.len())
            .field("effective_interval", &state.effective_interval())
            .field("armed_period", &state.coalescer.armed_period())
            .finish()
    }
}

impl SharedClock {
    /// Build an engine on `scheduler`.
    ///
    /// Fails if `config.minimum_refresh_interval_ms` is not a positive
    /// integer.
    pub fn new(
        config: ClockConfig,
        scheduler: Rc<dyn Scheduler>,
    ) -> Result<Self, InvalidIntervalError> {
        let floor = config.minimum_refresh_interval()?;
        let now = scheduler.now();
        let initial = config.initial_date.unwrap_or(now);
        let mode = config.notify_mode();
        debug!(%initial, floor = floor.get(), ?mode, "shared clock created");
        Ok(Self {
            shared: Rc::new(Shared {
                state: RefCell::new(EngineState {
                    registry: Registry::new(),
                    coalescer: Coalescer::new(floor, now),
                    notifier: Notifier::new(initial, mode),
                    delivering: false,
                    deferred: VecDeque::new(),
                }),
                scheduler,
            }),
        })
    }

    /// The current snapshot. Never refreshes and has no side effects.
    #[must_use]
    pub fn state_snapshot(&self) -> Instant {
        self.shared.state.borrow().notifier.snapshot()
    }

    /// Register a callback at a cadence.
    ///
    /// The callback is not called synchronously for the first subscriber; a
    /// later subscriber whose interval has already elapsed since the last
    /// tick triggers an immediate catch-up tick. Fails, with the engine
    /// untouched, if the interval is not a positive integer or
    /// [`IDLE`](tickshare_core::IDLE).
    pub fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription, InvalidIntervalError> {
        let registration = {
            let mut state = self.shared.state.borrow_mut();
            let baseline = state.coalescer.last_tick();
            state.registry.reserve(
                options.on_update,
                options.target_refresh_interval_ms,
                baseline,
            )?
        };
        let id = registration.id();
        debug!(%id, interval = %registration.interval(), "subscribe");
        dispatch(&self.shared, Deferred::Add(registration));
        let pending_update = self.shared.state.borrow().notifier.has_pending_update();
        Ok(Subscription {
            engine: Rc::downgrade(&self.shared),
            id,
            pending_update,
            active: Cell::new(true),
        })
    }

    /// Notify every live registration with the current snapshot now.
    ///
    /// Does not refresh the snapshot and does not move the timer.
    pub fn flush(&self) {
        dispatch(&self.shared, Deferred::Flush);
    }

    /// Number of live registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.borrow().registry.len()
    }

    /// `max(floor, fastest request)`; `None` with no registrations.
    #[must_use]
    pub fn effective_interval(&self) -> Option<RefreshInterval> {
        self.shared.state.borrow().effective_interval()
    }

    /// Period of the armed timer, if one is running.
    #[must_use]
    pub fn armed_period(&self) -> Option<u64> {
        self.shared.state.borrow().coalescer.armed_period()
    }

    /// Whether the snapshot changed since the last fan-out (manual mode).
    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.shared.state.borrow().notifier.has_pending_update()
    }

    /// Configured notification mode.
    #[must_use]
    pub fn notify_mode(&self) -> NotifyMode {
        self.shared.state.borrow().notifier.mode()
    }

    /// Configured minimum refresh interval.
    #[must_use]
    pub fn minimum_refresh_interval(&self) -> NonZeroU64 {
        self.shared.state.borrow().coalescer.floor()
    }
}

/// Handle for one registration.
///
/// [`unsubscribe`](Self::unsubscribe) is idempotent, and dropping the handle
/// unsubscribes. The handle holds only a weak engine reference, so it is safe
/// to use after the engine is gone.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    engine: Weak<Shared>,
    id: RegistrationId,
    pending_update: bool,
    active: Cell<bool>,
}

impl Subscription {
    /// The registration this handle controls.
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Whether the snapshot had changed without being fanned out when this
    /// subscription was registered. Always false in auto-notify mode; in
    /// manual mode it tells the consumer to re-read the snapshot.
    #[must_use]
    pub fn pending_update(&self) -> bool {
        self.pending_update
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Remove the registration. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(shared) = self.engine.upgrade() {
            debug!(id = %self.id, "unsubscribe");
            dispatch(&shared, Deferred::Remove(self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending_update", &self.pending_update)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Run `op` now, or queue it if a fan-out is in progress.
fn dispatch(shared: &Rc<Shared>, op: Deferred) {
    {
        let mut state = shared.state.borrow_mut();
        if state.delivering {
            trace!("deferring operation until fan-out completes");
            state.deferred.push_back(op);
            return;
        }
        state.delivering = true;
    }
    let _round = DeliveryRound { shared };
    let mut next = Some(op);
    while let Some(op) = next {
        let (fan_out, removed) = apply(shared, op);
        // Dropped outside the borrow: a callback may own a Subscription.
        drop(removed);
        if let Some(fan_out) = fan_out {
            trace!(callbacks = fan_out.len(), snapshot = %fan_out.snapshot(), "fan-out");
            fan_out.deliver();
        }
        next = shared.state.borrow_mut().deferred.pop_front();
    }
}

/// Clears the delivering flag when the dispatch loop ends.
///
/// When a callback unwinds, the operations it queued are still applied
/// (flushes excepted) so handles and the timer stay consistent with the
/// registry; their fan-outs are dropped undelivered.
struct DeliveryRound<'a> {
    shared: &'a Rc<Shared>,
}

impl Drop for DeliveryRound<'_> {
    fn drop(&mut self) {
        loop {
            let op = match self.shared.state.try_borrow_mut() {
                Ok(mut state) => match state.deferred.pop_front() {
                    Some(op) => op,
                    None => {
                        state.delivering = false;
                        return;
                    }
                },
                Err(_) => return,
            };
            if matches!(op, Deferred::Flush) {
                continue;
            }
            let (fan_out, removed) = apply(self.shared, op);
            drop(removed);
            if let Some(fan_out) = fan_out {
                trace!(skipped = fan_out.len(), "fan-out skipped after callback panic");
            }
        }
    }
}

fn apply(shared: &Rc<Shared>, op: Deferred) -> (Option<FanOut>, Option<Registration>) {
    let now = shared.scheduler.now();
    let mut state = shared.state.borrow_mut();
    match op {
        Deferred::Add(mut registration) => {
            let first = state.registry.is_empty();
            if first {
                registration.rebase(now);
            }
            let interval = registration.interval().clamp_to(state.coalescer.floor());
            state.registry.insert(registration);
            let change = RegistrySetChange::Added { interval, first };
            (reconcile(shared, &mut state, change, now), None)
        }
        Deferred::Remove(id) => {
            let removed = state.registry.remove(id);
            if removed.is_none() {
                return (None, None);
            }
            let fan_out = reconcile(shared, &mut state, RegistrySetChange::Removed, now);
            (fan_out, removed)
        }
        Deferred::Flush => {
            let fan_out = state.registry.notify_all(state.notifier.snapshot());
            state.notifier.mark_delivered();
            (Some(fan_out), None)
        }
        Deferred::Tick => (Some(tick(shared, &mut state, now)), None),
        Deferred::Rearm => {
            let elapsed = state.coalescer.elapsed_since_tick(now);
            let plan = plan_after_tick(state.effective_interval(), elapsed);
            execute(shared, &mut state, plan);
            (None, None)
        }
    }
}

fn reconcile(
    shared: &Rc<Shared>,
    state: &mut EngineState,
    change: RegistrySetChange,
    now: Instant,
) -> Option<FanOut> {
    let effective = state.effective_interval();
    let plan = state.coalescer.plan(change, effective, now);
    debug!(?change, ?effective, ?plan, "registration set changed");
    match plan {
        TimerPlan::TickNow => Some(tick(shared, state, now)),
        TimerPlan::PrimeAndArm { period } => {
            state.notifier.refresh(now);
            state.coalescer.mark_tick(now);
            arm(shared, state, period, period);
            None
        }
        plan => {
            execute(shared, state, plan);
            None
        }
    }
}

/// Refresh the snapshot and pick the due registrations. The timer is
/// re-armed by the `Rearm` queued ahead of everything else.
fn tick(shared: &Rc<Shared>, state: &mut EngineState, now: Instant) -> FanOut {
    let _span = debug_span!("tick", now = %now).entered();
    cancel_timer(shared, state);
    state.notifier.refresh(now);
    state.coalescer.mark_tick(now);
    let fan_out = match state.notifier.mode() {
        NotifyMode::Auto => {
            let fan_out = state.registry.notify_due(now, state.coalescer.floor());
            state.notifier.mark_delivered();
            fan_out
        }
        NotifyMode::Manual => FanOut::empty(now),
    };
    state.deferred.push_front(Deferred::Rearm);
    fan_out
}

fn execute(shared: &Rc<Shared>, state: &mut EngineState, plan: TimerPlan) {
    match plan {
        TimerPlan::Cancel => cancel_timer(shared, state),
        TimerPlan::Arm { delay, period } => arm(shared, state, delay, period),
        TimerPlan::Keep | TimerPlan::PrimeAndArm { .. } | TimerPlan::TickNow => {}
    }
}

fn cancel_timer(shared: &Rc<Shared>, state: &mut EngineState) {
    if let Some(handle) = state.coalescer.take_timer() {
        shared.scheduler.cancel(handle);
    }
}

fn arm(shared: &Rc<Shared>, state: &mut EngineState, delay: u64, period: u64) {
    cancel_timer(shared, state);
    let weak = Rc::downgrade(shared);
    let handle = shared.scheduler.arm(
        delay,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                on_timer(&shared);
            }
        }),
    );
    trace!(delay, period, "timer armed");
    state.coalescer.set_timer(handle, period);
}

fn on_timer(shared: &Rc<Shared>) {
    {
        let mut state = shared.state.borrow_mut();
        // The handle fired, so it must not be cancelled again.
        state.coalescer.take_timer();
    }
    dispatch(shared, Deferred::Tick);
}
