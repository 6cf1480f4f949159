#![forbid(unsafe_code)]

//! Core: read-only instants, refresh intervals, and validation errors.
//!
//! # Role in tickshare
//! `tickshare-core` holds the value types that cross the engine boundary.
//! The runtime (`tickshare-runtime`) owns the one mutable snapshot and hands
//! out [`Instant`] copies; subscribers describe how often they want them with
//! raw millisecond counts that are validated into [`RefreshInterval`]s.
//!
//! # Primary responsibilities
//! - **Instant**: immutable point-in-time value with calendar accessors.
//! - **RefreshInterval**: validated cadence, including the idle sentinel.
//! - **Interval constants**: [`IDLE`], [`ONE_SECOND`], [`ONE_MINUTE`], [`ONE_HOUR`].
//! - **InvalidIntervalError**: the only error kind in the engine contract.

pub mod error;
pub mod instant;
pub mod interval;
pub mod logging;

pub use error::{IntervalParameter, InvalidIntervalError};
pub use instant::Instant;
pub use interval::{IDLE, ONE_HOUR, ONE_MINUTE, ONE_SECOND, RefreshInterval};

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};
