#![forbid(unsafe_code)]

//! Structured logging hooks.
//!
//! With the `tracing` feature the usual macros are re-exported so dependent
//! crates log through one path. With `tracing-json`, [`init_json_logging`]
//! installs a JSON subscriber filtered by `RUST_LOG` (default `info`).

#[cfg(feature = "tracing")]
pub use tracing::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};

/// Default filter directive when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Install a global JSON subscriber.
///
/// Returns `false` if a global subscriber was already installed, so calling
/// this more than once is harmless.
#[cfg(feature = "tracing-json")]
pub fn init_json_logging() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .try_init()
        .is_ok()
}

#[cfg(all(test, feature = "tracing-json"))]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected_quietly() {
        let _first = init_json_logging();
        assert!(!init_json_logging());
    }
}
