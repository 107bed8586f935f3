use thiserror::Error;

/// Errors produced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("identity service unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("ticket rejected: {0}")]
    TicketRejected(String),

    #[error("origin mismatch: ticket bound to {expected}, connected from {actual}")]
    OriginMismatch { expected: String, actual: String },

    #[error("session already registered: {0}")]
    SessionConflict(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("invalid directive: {0}")]
    Directive(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Directive(e.to_string())
    }
}

impl GatewayError {
    /// Whether this error came out of ticket authentication (as opposed to
    /// transport or internal failures).
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::IdentityUnavailable(_)
                | GatewayError::TicketRejected(_)
                | GatewayError::OriginMismatch { .. }
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
