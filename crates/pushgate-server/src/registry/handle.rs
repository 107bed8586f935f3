//! The registry's view of one live session.

use pushgate_core::{GatewayError, GatewayResult};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// A frame queued for a session's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A routed message, written as a text frame.
    Text(String),
    /// Keepalive probe, written as a ping frame.
    Ping,
}

/// Derive the session identity from the peer address (`"<ip>_<port>"`).
pub fn session_id_for(addr: &SocketAddr) -> String {
    format!("{}_{}", addr.ip(), addr.port())
}

/// Handle to a registered session.
///
/// The sender is the only path to the session's transport: the matching
/// receiver is owned by the session's writer task. Cloning a handle does not
/// grant ownership of the session; only the session handler closes it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Unique per physical connection.
    pub session_id: String,
    /// User bound at authentication.
    pub user_id: String,
    /// When the session became active.
    pub connected_at: Instant,
    tx: mpsc::Sender<Outbound>,
    closer: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        tx: mpsc::Sender<Outbound>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            connected_at: Instant::now(),
            tx,
            closer,
        }
    }

    /// Queue a routed message for this session.
    ///
    /// Never blocks. If the session's buffer is full or its writer is gone,
    /// the session is signalled to close and an error is returned.
    pub fn deliver(&self, message: &str) -> GatewayResult<()> {
        self.push(Outbound::Text(message.to_string()))
    }

    /// Queue a keepalive probe. Same failure semantics as [`deliver`](Self::deliver).
    pub fn probe(&self) -> GatewayResult<()> {
        self.push(Outbound::Ping)
    }

    /// Ask the owning session handler to close this session.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.closer.is_cancelled()
    }

    fn push(&self, frame: Outbound) -> GatewayResult<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.close();
                Err(GatewayError::Delivery(format!(
                    "outbound buffer full for session {}",
                    self.session_id
                )))
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Err(GatewayError::Delivery(format!(
                    "session {} writer closed",
                    self.session_id
                )))
            }
        }
    }
}
