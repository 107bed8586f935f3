//! Client sessions: the upgrade handler and the per-connection lifecycle.
//!
//! An authenticated socket is split in two. The writer task owns the sink and
//! drains the session's outbound channel; the session loop owns the stream,
//! the keepalive timer and the close signal. Whoever notices the connection
//! is dead fires the close signal, and the session loop tears down.

pub mod handler;

use crate::registry::{ConnectionRegistry, Outbound, SessionHandle};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use pushgate_core::{GatewayError, GatewayResult, TicketClaims};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long teardown waits for the Close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session tuning shared by every connection.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Interval between keepalive pings.
    pub keepalive: Duration,
    /// Outbound frames buffered before a write counts as failed.
    pub outbound_buffer: usize,
}

/// Drive an authenticated connection from registration to deregistration.
///
/// `shutdown` is the process-wide token; the session closes when it fires.
pub async fn run(
    socket: WebSocket,
    session_id: String,
    claims: TicketClaims,
    registry: Arc<ConnectionRegistry>,
    settings: SessionSettings,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(settings.outbound_buffer);
    let closer = shutdown.child_token();
    let handle = SessionHandle::new(&session_id, &claims.user_id, tx, closer.clone());

    if let Err(e) = registry.register(handle.clone()).await {
        warn!(session_id = %session_id, user_id = %claims.user_id, error = %e, "session refused");
        let frame = CloseFrame {
            code: close_code::POLICY,
            reason: "session conflict".into(),
        };
        let refusal = async {
            sink.send(Message::Close(Some(frame))).await?;
            sink.close().await
        };
        if let Err(e) = close_transport(refusal, CLOSE_TIMEOUT).await {
            debug!(session_id = %session_id, error = %e, "close frame not sent");
        }
        return;
    }

    info!(session_id = %session_id, user_id = %claims.user_id, "session active");

    let writer = tokio::spawn(write_loop(sink, rx, closer.clone(), session_id.clone()));

    let period = settings.keepalive;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_pong: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            _ = closer.cancelled() => {
                break if shutdown.is_cancelled() { "shutdown" } else { "close requested" };
            }
            _ = keepalive.tick() => {
                if let Err(e) = handle.probe() {
                    debug!(session_id = %session_id, error = %e, "keepalive probe failed");
                    break "keepalive failed";
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Pong(_))) => {
                    debug!(session_id = %session_id, "pong");
                    last_pong = Some(Instant::now());
                }
                Some(Ok(Message::Close(_))) | None => break "peer closed",
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "read failed");
                    break "read error";
                }
                // Client data frames carry nothing for the gateway.
                Some(Ok(_)) => {}
            },
        }
    };

    registry.deregister(&session_id).await;
    closer.cancel();
    let duration = handle.connected_at.elapsed();
    drop(handle);

    match writer.await {
        Ok(mut sink) => {
            if let Err(e) = close_transport(sink.close(), CLOSE_TIMEOUT).await {
                debug!(session_id = %session_id, error = %e, "transport close failed");
            }
        }
        Err(e) => warn!(session_id = %session_id, error = %e, "writer task failed"),
    }

    info!(
        session_id = %session_id,
        user_id = %claims.user_id,
        reason,
        duration_ms = duration.as_millis() as u64,
        last_pong_ms = last_pong.map(|t| t.elapsed().as_millis() as u64),
        "session closed"
    );
}

/// Owns the sink until the session closes, then hands it back.
///
/// A send that stalls (peer stopped reading) is abandoned as soon as the
/// close signal fires.
async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Outbound>,
    closer: CancellationToken,
    session_id: String,
) -> S
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let frame = tokio::select! {
            _ = closer.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let message = match frame {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Ping => Message::Ping(Vec::new()),
        };
        let sent = tokio::select! {
            _ = closer.cancelled() => break,
            sent = sink.send(message) => sent,
        };
        if let Err(e) = sent {
            debug!(session_id = %session_id, error = %e, "write failed");
            closer.cancel();
            break;
        }
    }
    sink
}

/// Run the final close of a transport, giving up after `limit`.
async fn close_transport<F, E>(close: F, limit: Duration) -> GatewayResult<()>
where
    F: std::future::Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(limit, close).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::Transport(e.to_string())),
        Err(_) => Err(GatewayError::Timeout),
    }
}
