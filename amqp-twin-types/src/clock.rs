//! Monotonic clock abstraction
//!
//! `CbsAgent`'s put-token deadlines need a monotonic instant, not wall-clock time. Routing
//! it through a trait (rather than calling `tokio::time::Instant::now()` directly) lets
//! tests drive the 120s deadline / 10s sweep with `tokio::time::{pause, advance}` without
//! any real sleeping, the same way `fe2o3-engine`'s heartbeat logic is built on
//! `tokio::time::Sleep` rather than a raw timer thread.

use tokio::time::Instant;

/// A source of monotonic instants.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The default [`Clock`] backed by `tokio::time::Instant::now()`.
///
/// Under `tokio::time::pause()` (as used in tests), this advances only when the runtime's
/// virtual clock is advanced, which is exactly the property the CBS timeout sweep tests
/// rely on.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
