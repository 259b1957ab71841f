//! Thin re-export layer over `tracing`, matching the teacher's `utils::log`
//! shape: callers get `trace!/debug!/info!/warn!/error!` and `#[instrument]`
//! without depending on `tracing` directly, plus a convenience subscriber
//! initializer for hosts that have not installed their own.
//!
//! Per §4.M, the codec (component C) never logs — only the pipeline and
//! diagnostics layers call into this module.

pub use tracing::{debug, debug_span, error, info, instrument, trace, warn, Level};

/// Installs a global `fmt` subscriber at `level`. Idempotent: a second call
/// after a subscriber is already installed is a silent no-op, matching the
/// teacher's "best effort, host may have its own" policy.
pub fn init_subscriber(level: Level) {
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
