#![forbid(unsafe_code)]

//! Runtime: the shared-clock engine.
//!
//! # Role in tickshare
//! Many consumers want "the current time", each at its own refresh cadence.
//! Instead of one timer per consumer, a [`SharedClock`] keeps a single
//! snapshot and a single timer running at the fastest requested cadence, and
//! wakes each subscriber only as often as it asked.
//!
//! # Primary responsibilities
//! - **Registry** ([`registry`]): live registrations and callback dedup.
//! - **Coalescer** ([`coalescer`]): effective interval and timer planning.
//! - **Notifier** ([`notifier`]): the snapshot and the pending-update flag.
//! - **Scheduler adapter** ([`scheduler`]): host timers, real or virtual.
//! - **Engine** ([`engine`]): the public subscribe/unsubscribe/flush API.
//!
//! # Concurrency model
//! Single-threaded and callback-driven. The engine is `!Send`; every state
//! transition runs to completion before the next begins.

pub mod coalescer;
pub mod config;
pub mod engine;
pub mod notifier;
pub mod registry;
pub mod scheduler;

pub use config::{ClockConfig, ConfigError, DEFAULT_MINIMUM_REFRESH_INTERVAL_MS};
pub use engine::{SharedClock, SubscribeOptions, Subscription};
pub use notifier::NotifyMode;
pub use registry::{RegistrationId, UpdateCallback};
pub use scheduler::{ManualScheduler, Scheduler, SystemScheduler, TimerCallback, TimerHandle};

pub use tickshare_core::{
    IDLE, Instant, IntervalParameter, InvalidIntervalError, ONE_HOUR, ONE_MINUTE, ONE_SECOND,
    RefreshInterval,
};
