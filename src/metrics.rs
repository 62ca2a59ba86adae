//! Metric helpers for `wirecall`.
//!
//! This module defines metric names and thin helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops and no recorder is consulted.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking live connections.
pub const CONNECTIONS_ACTIVE: &str = "wirecall_connections_active";
/// Name of the counter tracking frames read or written.
pub const FRAMES_PROCESSED: &str = "wirecall_frames_processed_total";
/// Name of the counter tracking inbound frames discarded by the dispatcher.
pub const FRAMES_DROPPED: &str = "wirecall_frames_dropped_total";
/// Name of the counter tracking panics caught in handlers and callbacks.
pub const PANICS_TOTAL: &str = "wirecall_panics_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Where a caught panic originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanicSite {
    /// A routed request or notification handler.
    Handler,
    /// An async call's callback.
    Callback,
}

impl PanicSite {
    /// Label value used for this site.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PanicSite::Handler => "handler",
            PanicSite::Callback => "callback",
        }
    }
}

/// Increment the active connections gauge.
#[cfg(feature = "metrics")]
pub fn inc_connections() { gauge!(CONNECTIONS_ACTIVE).increment(1.0); }

/// Decrement the active connections gauge.
#[cfg(feature = "metrics")]
pub fn dec_connections() { gauge!(CONNECTIONS_ACTIVE).decrement(1.0); }

/// Record `count` frames processed in `direction`.
#[cfg(feature = "metrics")]
pub fn inc_frames(direction: Direction, count: u64) {
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(count);
}

/// Record a dropped inbound frame.
#[cfg(feature = "metrics")]
pub fn inc_dropped(reason: &'static str) {
    counter!(FRAMES_DROPPED, "reason" => reason).increment(1);
}

/// Record a caught panic.
#[cfg(feature = "metrics")]
pub fn inc_panics(site: PanicSite) {
    counter!(PANICS_TOTAL, "site" => site.as_str()).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub fn inc_connections() {}

#[cfg(not(feature = "metrics"))]
pub fn dec_connections() {}

#[cfg(not(feature = "metrics"))]
pub fn inc_frames(_direction: Direction, _count: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn inc_dropped(_reason: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub fn inc_panics(_site: PanicSite) {}
