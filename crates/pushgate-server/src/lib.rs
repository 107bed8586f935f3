//! pushgate: a real-time fan-out gateway.
//!
//! WebSocket clients authenticate with a ticket checked against an identity
//! service; routing directives consumed from an AMQP queue are pushed to every
//! session of a user, or to all sessions.

pub mod auth;
pub mod config;
pub mod registry;
pub mod routing;
pub mod server;
pub mod session;
pub mod stub;

pub use config::ServerConfig;
pub use server::GatewayServer;
