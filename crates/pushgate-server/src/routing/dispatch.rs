//! Directive dispatch: resolve the target sessions and queue the message on
//! each of them.

use crate::registry::ConnectionRegistry;
use pushgate_core::Directive;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of dispatching one directive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sessions the directive resolved to.
    pub targeted: usize,
    /// Sessions the message was queued on.
    pub delivered: usize,
    /// Sessions whose write failed (each has been told to close).
    pub failed: usize,
}

/// Routes directives to sessions through the registry.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatch a decoded directive.
    ///
    /// A failed write to one session never stops delivery to the others.
    pub async fn dispatch(&self, directive: &Directive) -> DispatchReport {
        let targets = match directive {
            Directive::All { .. } => self.registry.all().await,
            Directive::ToUser { user_id, .. } => self.registry.lookup_by_user(user_id).await,
        };

        if targets.is_empty() {
            debug!(mode = directive.mode(), "no target sessions, directive dropped");
            return DispatchReport::default();
        }

        let mut report = DispatchReport {
            targeted: targets.len(),
            ..DispatchReport::default()
        };

        let message = directive.message();
        for session in &targets {
            match session.deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        session_id = %session.session_id,
                        user_id = %session.user_id,
                        error = %e,
                        "delivery failed, closing session"
                    );
                }
            }
        }

        info!(
            mode = directive.mode(),
            targeted = report.targeted,
            delivered = report.delivered,
            failed = report.failed,
            "directive dispatched"
        );
        report
    }

    /// Decode a raw broker payload and dispatch it.
    ///
    /// Returns `None` if the payload is not a valid directive; such payloads
    /// are logged and dropped.
    pub async fn handle_payload(&self, payload: &[u8]) -> Option<DispatchReport> {
        match Directive::decode(payload) {
            Ok(directive) => Some(self.dispatch(&directive).await),
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "dropping undecodable directive"
                );
                None
            }
        }
    }
}
