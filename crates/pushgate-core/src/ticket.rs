//! Identity claims bound to a ticket.

use serde::{Deserialize, Serialize};

/// What the identity service knows about a ticket: the user it was issued to
/// and the address that requested it.
///
/// Wire format: `{"ipaddr": "<origin>", "userid": "<id>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    /// Address the ticket was issued to.
    #[serde(rename = "ipaddr")]
    pub origin: String,
    /// Owning user.
    #[serde(rename = "userid")]
    pub user_id: String,
}

impl TicketClaims {
    pub fn new(origin: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            user_id: user_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_identity_response() {
        let claims: TicketClaims =
            serde_json::from_str(r#"{"ipaddr": "1.2.3.4", "userid": "u1"}"#).unwrap();
        assert_eq!(claims, TicketClaims::new("1.2.3.4", "u1"));
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let json = serde_json::to_value(TicketClaims::new("127.0.0.1", "1")).unwrap();
        assert_eq!(json["ipaddr"], "127.0.0.1");
        assert_eq!(json["userid"], "1");
    }

    #[test]
    fn test_missing_userid_is_an_error() {
        let result = serde_json::from_str::<TicketClaims>(r#"{"ipaddr": "1.2.3.4"}"#);
        assert!(result.is_err());
    }
}
