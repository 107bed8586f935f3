//! pushgate-core: Shared types for the pushgate fan-out gateway.
//!
//! Provides the routing directive consumed from the broker, the ticket
//! claims returned by the identity service, and the common error type.

pub mod directive;
pub mod error;
pub mod ticket;

// Re-export commonly used items at crate root.
pub use directive::Directive;
pub use error::{GatewayError, GatewayResult};
pub use ticket::TicketClaims;
