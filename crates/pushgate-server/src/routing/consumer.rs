//! AMQP consumer: pulls directives off the output queue and hands them to
//! the dispatcher.
//!
//! Every delivery is acknowledged once processed, whether or not it decoded
//! and whether or not any session received it. Connection failures are
//! retried with backoff; they never take the process down.

use super::backoff::Backoff;
use super::dispatch::{DispatchReport, Dispatcher};
use crate::config::BrokerConfig;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use pushgate_core::{GatewayError, GatewayResult};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Long-lived consumer of the directive queue.
pub struct BrokerConsumer {
    config: BrokerConfig,
    dispatcher: Arc<Dispatcher>,
    backoff: Backoff,
}

impl BrokerConsumer {
    pub fn new(config: BrokerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            backoff: Backoff::default(),
        }
    }

    /// Replace the reconnect backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consume until `shutdown` is cancelled, reconnecting as needed.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            broker = %self.config.endpoint(),
            queue = %self.config.queue,
            "starting broker consumer"
        );

        loop {
            match self.consume(&shutdown).await {
                Ok(()) if shutdown.is_cancelled() => break,
                Ok(()) => warn!("broker delivery stream ended"),
                Err(e) => warn!(error = %e, "broker consumer failed"),
            }

            let delay = self.backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting to broker");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("broker consumer stopped");
    }

    /// One connection's worth of consuming. Returns `Ok(())` on shutdown or
    /// when the broker ends the delivery stream.
    async fn consume(&mut self, shutdown: &CancellationToken) -> GatewayResult<()> {
        let connection = Connection::connect(&self.config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(broker_error)?;
        let channel = connection.create_channel().await.map_err(broker_error)?;

        if self.config.prefetch > 0 {
            channel
                .basic_qos(self.config.prefetch, BasicQosOptions::default())
                .await
                .map_err(broker_error)?;
        }

        if self.config.declare_queue {
            channel
                .queue_declare(
                    &self.config.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(broker_error)?;
        }

        let mut deliveries = channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)?;

        self.backoff.reset();
        info!(queue = %self.config.queue, "consuming directives");

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        debug!(bytes = delivery.data.len(), "directive received");
                        let acker = &delivery.acker;
                        let processed = process_delivery(&self.dispatcher, &delivery.data, move || {
                            acker.ack(BasicAckOptions::default())
                        })
                        .await;
                        if let Err(e) = processed {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(broker_error(e)),
                    None => break Ok(()),
                },
            }
        };

        if let Err(e) = connection.close(200, "consumer stopping").await {
            debug!(error = %e, "broker connection close failed");
        }
        result
    }
}

/// Dispatch one delivery's payload, then acknowledge it.
///
/// The ack runs whatever the payload turned out to be: undecodable, without
/// targets, or partly failed. Only a failed ack is an error.
pub(crate) async fn process_delivery<A, F, E>(
    dispatcher: &Dispatcher,
    payload: &[u8],
    ack: A,
) -> GatewayResult<Option<DispatchReport>>
where
    A: FnOnce() -> F,
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    let report = dispatcher.handle_payload(payload).await;
    ack().await.map_err(|e| GatewayError::Broker(format!("ack failed: {e}")))?;
    Ok(report)
}

fn broker_error(e: lapin::Error) -> GatewayError {
    GatewayError::Broker(e.to_string())
}
