//! Client for the external identity service.
//!
//! Exchanges a ticket for the claims bound to it:
//! `GET <url>?ticket=<t>` with `Authorization: Bearer <token>`, answered by
//! `{"ipaddr": "...", "userid": "..."}`.

use pushgate_core::{GatewayError, GatewayResult, TicketClaims};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for ticket validation.
pub struct IdentityClient {
    /// Validation endpoint (ticket is appended as a query parameter).
    url: String,
    /// Bearer token presented to the identity service.
    token: String,
    /// HTTP client (reusable, carries the request timeout).
    http_client: reqwest::Client,
}

impl IdentityClient {
    /// Create a client. Every request is bounded by `timeout`.
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("identity http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            token: token.into(),
            http_client,
        })
    }

    /// Validate a ticket.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::IdentityUnavailable`] if the service cannot be
    ///   reached or does not answer within the timeout.
    /// - [`GatewayError::TicketRejected`] if the service answers with a
    ///   non-success status, an undecodable body, or an empty user id.
    pub async fn validate(&self, ticket: &str) -> GatewayResult<TicketClaims> {
        let response = self
            .http_client
            .get(&self.url)
            .query(&[("ticket", ticket)])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %self.url, error = %e, "identity request failed");
                if e.is_timeout() {
                    GatewayError::IdentityUnavailable("identity service timed out".into())
                } else {
                    GatewayError::IdentityUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = %status, "identity service refused ticket");
            return Err(GatewayError::TicketRejected(format!(
                "identity service returned {status}"
            )));
        }

        let claims: TicketClaims = response.json().await.map_err(|e| {
            warn!(error = %e, "undecodable identity response");
            GatewayError::TicketRejected(format!("undecodable identity response: {e}"))
        })?;

        if claims.user_id.is_empty() {
            return Err(GatewayError::TicketRejected("ticket has no user".into()));
        }

        debug!(user_id = %claims.user_id, origin = %claims.origin, "ticket validated");
        Ok(claims)
    }
}
