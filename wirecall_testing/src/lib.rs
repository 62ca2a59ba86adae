//! Utilities for exercising `wirecall` connections in tests.
//!
//! These helpers connect [`Client`](wirecall::Client)s over
//! `tokio::io::duplex` streams, hand-encode frames the library's own
//! constructors would refuse, and capture log output and metrics.
//!
//! ```rust
//! use wirecall::Handler;
//! use wirecall_testing::client_pair;
//!
//! # async fn example() {
//! let handler = Handler::builder().build().expect("handler");
//! let (left, right) = client_pair(handler.clone(), handler);
//! left.close();
//! right.close();
//! # }
//! ```

pub mod frames;
pub mod logging;
pub mod macros;
pub mod metrics;
pub mod pair;

pub use frames::{raw_frame, raw_head};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, debugging_recorder};
pub use pair::{DEFAULT_CAPACITY, client_pair, probe_recv, raw_client};
