//! Connection registry: session handles and the shared session table.

pub mod handle;
pub mod table;

pub use handle::{session_id_for, Outbound, SessionHandle};
pub use table::ConnectionRegistry;
