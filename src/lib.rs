#![doc(html_root_url = "https://docs.rs/wirecall/latest")]
//! Public API for the `wirecall` library.
//!
//! `wirecall` is a bidirectional request/response and notification transport
//! over any reliable byte stream. Each message is a 16-byte big-endian head
//! followed by an optional method name and an opaque payload. Either end of a
//! connection may call the other:
//!
//! - a [`Handler`] holds the method routes, pools, hooks and settings shared
//!   by every connection;
//! - a [`Client`] drives one connection, dispatching inbound messages to the
//!   handler and correlating responses with outstanding calls.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use wirecall::{Client, Handler};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let handler = Handler::builder()
//!     .route("echo", |ctx| async move {
//!         let body = ctx.body().to_vec();
//!         let _ = ctx.write(&body).await;
//!     })?
//!     .build()?;
//! let client = Client::connect("127.0.0.1:8888", handler).await?;
//! let reply = client.call("echo", b"hello", Duration::from_secs(1)).await?;
//! assert_eq!(reply.body(), b"hello");
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod pool;
pub mod router;
pub mod serializer;

pub use client::Client;
pub use config::{DispatchMode, HandlerConfig, RecoveryPolicy};
pub use connection::{ConnectionId, ConnectionInfo};
pub use context::Context;
pub use correlation::{AsyncCallback, Correlator};
pub use error::{CallError, ConfigError, RecvError, ReplyError, SendError};
pub use handler::{Dispatch, DropReason, Handler, HandlerBuilder};
pub use message::{Cmd, FrameError, Message};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, FRAMES_DROPPED, FRAMES_PROCESSED, PANICS_TOTAL};
pub use pool::MessagePool;
pub use router::{RouteError, Router, RouterBuilder, handler_fn};
pub use serializer::{BincodeSerializer, Serializer};
