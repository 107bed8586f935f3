//! Routing directives delivered by the broker.
//!
//! A directive names the session(s) that should receive a message:
//!
//! ```text
//! {"mode": "all",    "message": "..."}
//! {"mode": "touser", "message": "...", "userid": "..."}
//! ```
//!
//! Anything else (unknown mode, missing fields, non-string values) fails to
//! decode and is dropped by the consumer.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

/// A decoded routing directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum Directive {
    /// Push `message` to every live session.
    #[serde(rename = "all")]
    All { message: String },

    /// Push `message` to every live session of one user.
    #[serde(rename = "touser")]
    ToUser {
        message: String,
        #[serde(rename = "userid")]
        user_id: String,
    },
}

impl Directive {
    /// Decode a directive from a raw broker payload.
    pub fn decode(payload: &[u8]) -> GatewayResult<Self> {
        serde_json::from_slice(payload).map_err(GatewayError::from)
    }

    /// The text pushed to each target session.
    pub fn message(&self) -> &str {
        match self {
            Directive::All { message } | Directive::ToUser { message, .. } => message,
        }
    }

    /// Mode name as it appears on the wire (for logging).
    pub fn mode(&self) -> &'static str {
        match self {
            Directive::All { .. } => "all",
            Directive::ToUser { .. } => "touser",
        }
    }
}
