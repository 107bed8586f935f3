//! `GET /ws?ticket=...`: authenticate while the upgrade request is held, then
//! hand the socket to the session loop.

use crate::registry::session_id_for;
use crate::server::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pushgate_core::GatewayError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Largest inbound message accepted from a client.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    pub ticket: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<TicketQuery>,
) -> Response {
    let ticket = match query.ticket.filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => {
            info!(peer = %peer, "connection without ticket");
            return (StatusCode::BAD_REQUEST, "missing ticket").into_response();
        }
    };

    let claims = match state.authenticator.authenticate(&ticket, peer.ip()).await {
        Ok(claims) => claims,
        Err(e) => {
            let status = rejection_status(&e);
            if e.is_auth_failure() {
                info!(peer = %peer, status = status.as_u16(), error = %e, "connection rejected");
            } else {
                warn!(peer = %peer, status = status.as_u16(), error = %e, "authentication failed");
            }
            return (status, e.to_string()).into_response();
        }
    };

    let session_id = session_id_for(&peer);
    let registry = state.registry.clone();
    let settings = state.settings;
    let shutdown = state.shutdown.clone();

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(move |e| warn!(peer = %peer, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            super::run(socket, session_id, claims, registry, settings, shutdown)
        })
}

/// HTTP status for a failed authentication.
pub fn rejection_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::TicketRejected(_) => StatusCode::UNAUTHORIZED,
        GatewayError::OriginMismatch { .. } => StatusCode::FORBIDDEN,
        GatewayError::IdentityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
