//! In-memory connections.

use std::sync::Arc;

use tokio::io::{DuplexStream, duplex};
use wirecall::{Client, ConnectionId, ConnectionInfo, Handler, Message, RecvError};

/// Buffer size of the duplex streams created by these helpers.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Connect two clients back to back.
///
/// The first client is served by `left`, the second by `right`.
pub fn client_pair(left: Arc<Handler>, right: Arc<Handler>) -> (Client, Client) {
    let (a, b) = duplex(DEFAULT_CAPACITY);
    (Client::new(a, left), Client::new(b, right))
}

/// Connect a client to a bare stream the test drives by hand.
pub fn raw_client(handler: Arc<Handler>) -> (Client, DuplexStream) {
    let (local, remote) = duplex(DEFAULT_CAPACITY);
    (Client::new(local, handler), remote)
}

/// Read one message from `stream` using `probe`'s pools and hooks.
///
/// # Errors
///
/// Returns the receive error unchanged.
pub async fn probe_recv(probe: &Handler, stream: &mut DuplexStream) -> Result<Message, RecvError> {
    let info = ConnectionInfo::new(ConnectionId::new(0), None);
    probe.recv(&info, stream).await
}
