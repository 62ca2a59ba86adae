//! Routing of inbound messages to handlers, sessions and callbacks.

use log::{error, info, warn};

use super::Handler;
use crate::{
    client::Client,
    error::CallError,
    message::{Cmd, Message},
    metrics::{self, PanicSite},
    panic::{guard_call, guard_future},
};

/// Why the dispatcher discarded a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DropReason {
    /// A request or notification without a method name.
    EmptyMethod,
    /// A method name that is not valid UTF-8.
    InvalidMethod,
    /// No handler is routed for the method.
    NoHandler,
    /// A response carrying a method name.
    ResponseWithMethod,
    /// A synchronous response whose caller is gone or never existed.
    SessionNotFound,
    /// An async response whose callback is gone or never existed.
    CallbackNotFound,
    /// An unrecognised command byte.
    UnknownCmd(u8),
}

impl DropReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyMethod => "empty_method",
            Self::InvalidMethod => "invalid_method",
            Self::NoHandler => "no_handler",
            Self::ResponseWithMethod => "response_with_method",
            Self::SessionNotFound => "session_not_found",
            Self::CallbackNotFound => "callback_not_found",
            Self::UnknownCmd(_) => "unknown_cmd",
        }
    }
}

/// Outcome of dispatching one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Dispatch {
    /// A routed handler ran to completion.
    Handled,
    /// A routed handler panicked; the panic was contained.
    HandlerPanicked,
    /// A response woke a waiting caller.
    Delivered,
    /// A response was passed to its async callback.
    CallbackInvoked,
    /// An async callback panicked; the panic was contained.
    CallbackPanicked,
    /// The message was discarded.
    Dropped(DropReason),
}

fn dropped(reason: DropReason) -> Dispatch {
    metrics::inc_dropped(reason.as_str());
    Dispatch::Dropped(reason)
}

impl Handler {
    /// Dispatch one inbound message received on `client`.
    ///
    /// Requests and notifications run their routed handler, responses
    /// complete the matching session or async callback, and anything else is
    /// logged and dropped. Panics in handlers or callbacks are caught, logged
    /// and reported in the returned [`Dispatch`]. Every path releases the
    /// message back to its pool.
    pub async fn on_message(&self, client: &Client, message: Message) -> Dispatch {
        match message.cmd() {
            Some(cmd @ (Cmd::Request | Cmd::Notify)) => self.dispatch_call(client, cmd, message).await,
            Some(Cmd::Response) => self.dispatch_response(client, message),
            None => {
                let cmd = message.head().cmd;
                info!("invalid cmd [{cmd}], dropped: seq={}", message.seq());
                dropped(DropReason::UnknownCmd(cmd))
            }
        }
    }

    async fn dispatch_call(&self, client: &Client, cmd: Cmd, message: Message) -> Dispatch {
        let seq = message.seq();
        let Ok(method) = message.method() else {
            warn!("invalid {cmd:?} message with non UTF-8 method, dropped: seq={seq}");
            return dropped(DropReason::InvalidMethod);
        };
        if method.is_empty() {
            warn!("invalid {cmd:?} message with 0 method length, dropped: seq={seq}");
            return dropped(DropReason::EmptyMethod);
        }
        let Some((method, handler)) = self.router.lookup_entry(method) else {
            warn!("invalid method: [{method}], no handler: seq={seq}");
            return dropped(DropReason::NoHandler);
        };

        let ctx = self.new_context(client.clone(), message);
        // Calling the handler may panic before any future exists.
        match guard_future(async move { handler(ctx).await }).await {
            Ok(()) => Dispatch::Handled,
            Err(panic) => {
                metrics::inc_panics(PanicSite::Handler);
                let peer_addr = client.info().peer_addr();
                error!("handler panicked: method={method}, seq={seq}, panic={panic}, peer_addr={peer_addr:?}");
                tracing::error!(%method, seq, panic = %panic, ?peer_addr, "handler panicked");
                Dispatch::HandlerPanicked
            }
        }
    }

    fn dispatch_response(&self, client: &Client, message: Message) -> Dispatch {
        let seq = message.seq();
        let method_len = message.method_len();
        if method_len != 0 {
            warn!("invalid response message with method length {method_len}, dropped: seq={seq}");
            return dropped(DropReason::ResponseWithMethod);
        }

        if !message.is_async() {
            if client.correlator().resolve_session(seq, message) {
                return Dispatch::Delivered;
            }
            info!("session not exist or expired: seq={seq}");
            return dropped(DropReason::SessionNotFound);
        }

        let Some(callback) = client.correlator().take_async(seq) else {
            info!("async handler not exist or expired: seq={seq}");
            return dropped(DropReason::CallbackNotFound);
        };
        let outcome = if message.is_error() {
            Err(CallError::Remote(
                String::from_utf8_lossy(message.body()).into_owned(),
            ))
        } else {
            Ok(self.new_context(client.clone(), message))
        };
        match guard_call(|| callback.invoke(outcome)) {
            Ok(()) => Dispatch::CallbackInvoked,
            Err(panic) => {
                metrics::inc_panics(PanicSite::Callback);
                error!("async callback panicked: seq={seq}, panic={panic}");
                tracing::error!(seq, panic = %panic, "async callback panicked");
                Dispatch::CallbackPanicked
            }
        }
    }
}
