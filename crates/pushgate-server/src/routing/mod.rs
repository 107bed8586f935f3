//! Broker-to-session routing: directive dispatch and the AMQP consumer.

pub mod backoff;
pub mod consumer;
pub mod dispatch;

pub use backoff::Backoff;
pub use consumer::BrokerConsumer;
pub use dispatch::{DispatchReport, Dispatcher};
