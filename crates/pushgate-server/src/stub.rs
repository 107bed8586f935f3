//! Stand-in identity service for local development and tests.
//!
//! Serves `GET /check/ticket?ticket=<t>` with the same response shape as the
//! real identity service. Tickets resolve from a fixed table, falling back
//! to a catch-all identity if one is configured.

use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pushgate_core::TicketClaims;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Path the stub answers on.
pub const CHECK_TICKET_PATH: &str = "/check/ticket";

/// Tickets known to the stub.
#[derive(Debug, Clone, Default)]
pub struct StubDirectory {
    tickets: HashMap<String, TicketClaims>,
    fallback: Option<TicketClaims>,
    token: Option<String>,
}

impl StubDirectory {
    /// Resolve `ticket` to `claims`.
    pub fn with_ticket(mut self, ticket: impl Into<String>, claims: TicketClaims) -> Self {
        self.tickets.insert(ticket.into(), claims);
        self
    }

    /// Resolve every ticket not in the table to `claims`.
    pub fn with_fallback(mut self, claims: TicketClaims) -> Self {
        self.fallback = Some(claims);
        self
    }

    /// Require `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn resolve(&self, ticket: &str) -> Option<&TicketClaims> {
        self.tickets.get(ticket).or(self.fallback.as_ref())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == token)
    }
}

/// Build the stub's router.
pub fn router(directory: StubDirectory) -> Router {
    Router::new()
        .route(CHECK_TICKET_PATH, get(check_ticket))
        .with_state(Arc::new(directory))
}

#[derive(Debug, Deserialize)]
struct TicketQuery {
    ticket: Option<String>,
}

async fn check_ticket(
    State(directory): State<Arc<StubDirectory>>,
    headers: HeaderMap,
    Query(query): Query<TicketQuery>,
) -> Response {
    if !directory.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(ticket) = query.ticket.filter(|t| !t.is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match directory.resolve(&ticket) {
        Some(claims) => {
            debug!(user_id = %claims.user_id, "stub resolved ticket");
            Json(claims.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
