//! Ticket authentication: identity-service lookup plus origin enforcement.

pub mod identity;
pub mod origin;

pub use identity::IdentityClient;
pub use origin::OriginPolicy;

use pushgate_core::{GatewayResult, TicketClaims};
use std::net::IpAddr;
use tracing::info;

/// Turns a ticket presented by a connecting peer into a verified identity.
pub struct Authenticator {
    identity: IdentityClient,
    policy: OriginPolicy,
}

impl Authenticator {
    pub fn new(identity: IdentityClient, policy: OriginPolicy) -> Self {
        Self { identity, policy }
    }

    /// Validate `ticket` and check it against the peer's address.
    ///
    /// Failures are scoped to this attempt: the error is returned to the
    /// caller, which rejects the one connection.
    pub async fn authenticate(&self, ticket: &str, peer: IpAddr) -> GatewayResult<TicketClaims> {
        let claims = self.identity.validate(ticket).await?;
        if let Err(e) = self.policy.check(&claims, peer) {
            info!(user_id = %claims.user_id, peer = %peer, error = %e, "origin check failed");
            return Err(e);
        }
        Ok(claims)
    }
}
