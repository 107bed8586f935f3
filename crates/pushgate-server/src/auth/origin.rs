//! Origin enforcement: the connecting address must match the address the
//! ticket was issued to.

use pushgate_core::{GatewayError, GatewayResult, TicketClaims};
use std::net::IpAddr;

/// Runtime mode in which origin enforcement is switched on.
pub const ENFORCING_APP_ENV: &str = "prod";

/// Whether the ticket's bound origin is checked against the peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Reject connections whose address differs from the ticket's origin.
    Enforce,
    /// Accept regardless of origin (local development).
    Bypass,
}

impl OriginPolicy {
    /// Resolve the policy: an explicit switch wins, otherwise enforcement is
    /// on only when `app_env` is `"prod"`.
    pub fn resolve(app_env: &str, explicit: Option<bool>) -> Self {
        match explicit {
            Some(true) => OriginPolicy::Enforce,
            Some(false) => OriginPolicy::Bypass,
            None if app_env == ENFORCING_APP_ENV => OriginPolicy::Enforce,
            None => OriginPolicy::Bypass,
        }
    }

    /// Check a peer address against the ticket's bound origin.
    pub fn check(&self, claims: &TicketClaims, peer: IpAddr) -> GatewayResult<()> {
        if *self == OriginPolicy::Bypass {
            return Ok(());
        }

        let matches = match claims.origin.trim().parse::<IpAddr>() {
            Ok(expected) => expected.to_canonical() == peer.to_canonical(),
            Err(_) => claims.origin.trim() == peer.to_string(),
        };

        if matches {
            Ok(())
        } else {
            Err(GatewayError::OriginMismatch {
                expected: claims.origin.clone(),
                actual: peer.to_string(),
            })
        }
    }
}
