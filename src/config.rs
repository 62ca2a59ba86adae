//! Handler configuration.
//!
//! [`HandlerConfig`] is the serialisable part of a handler's setup. It can be
//! deserialised from an application's own configuration file or adjusted
//! through [`HandlerBuilder`](crate::handler::HandlerBuilder).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 1024;

/// Most frames coalesced into one vectored write.
pub const MAX_BATCH_FRAMES: usize = 64;

/// Where the dispatcher runs handlers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Await each dispatch on the connection's receive loop.
    ///
    /// Messages from one connection are handled strictly in arrival order. A
    /// handler must not wait for a response from the same connection.
    #[default]
    Inline,
    /// Spawn each dispatch onto its own task.
    ///
    /// Handlers run concurrently; responses may leave in any order.
    Spawn,
}

/// What the receive loop does with a frame that violates the protocol but
/// leaves frame boundaries intact.
///
/// Stream-level corruption and transport failures always end the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Discard the frame, log it, and keep reading.
    #[default]
    Drop,
    /// Close the connection.
    Disconnect,
}

impl RecoveryPolicy {
    /// Returns the policy name as a static string for logging.
    ///
    /// ```
    /// use wirecall::config::RecoveryPolicy;
    ///
    /// assert_eq!(RecoveryPolicy::Drop.as_str(), "drop");
    /// assert_eq!(RecoveryPolicy::Disconnect.as_str(), "disconnect");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Tunables recognised by a [`Handler`](crate::handler::Handler).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Wrap each connection's reader (buffered by default).
    pub batch_recv: bool,
    /// Coalesce queued outbound frames into vectored writes.
    pub batch_send: bool,
    /// Capacity of each connection's outbound queue.
    pub send_queue_size: usize,
    /// Where handlers run.
    pub dispatch: DispatchMode,
    /// Treatment of single-frame protocol violations.
    pub violation_policy: RecoveryPolicy,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            batch_recv: true,
            batch_send: true,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            dispatch: DispatchMode::default(),
            violation_policy: RecoveryPolicy::default(),
        }
    }
}

impl HandlerConfig {
    /// Check the configuration for values the runtime cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSendQueueSize`] for a zero-capacity queue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_queue_size == 0 {
            return Err(ConfigError::InvalidSendQueueSize(self.send_queue_size));
        }
        Ok(())
    }
}
