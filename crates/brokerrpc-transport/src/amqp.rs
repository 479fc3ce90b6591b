//! AMQP 0-9-1 adapter backed by `lapin`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{Channel, Connection, Connector, Delivery, DeliveryStream, Publishing};

/// How often connection status is polled in addition to the error callback.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Reply code for a normal channel/connection close.
const REPLY_SUCCESS: u16 = 200;

/// Dials AMQP brokers (`amqp://` / `amqps://` URIs).
#[derive(Clone)]
pub struct AmqpConnector {
    properties: ConnectionProperties,
}

impl AmqpConnector {
    /// Connector with default connection properties.
    pub fn new() -> Self {
        Self {
            properties: ConnectionProperties::default(),
        }
    }

    /// Connector with explicit connection properties.
    pub fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

impl Default for AmqpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn Connection>> {
        let connection = lapin::Connection::connect(uri, self.properties.clone())
            .await
            .map_err(|err| TransportError::Dial {
                uri: uri.to_string(),
                reason: err.to_string(),
            })?;

        let closed = CancellationToken::new();
        let signal = closed.clone();
        connection.on_error(move |err| {
            warn!(error = %err, "amqp connection error");
            signal.cancel();
        });

        debug!(uri, "amqp connection established");
        Ok(Arc::new(AmqpConnection {
            inner: connection,
            closed,
        }))
    }
}

struct AmqpConnection {
    inner: lapin::Connection,
    closed: CancellationToken,
}

#[async_trait]
impl Connection for AmqpConnection {
    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || !self.inner.status().connected()
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|err| TransportError::Channel(err.to_string()))?;
        Ok(Box::new(AmqpChannel { inner: channel }))
    }

    async fn closed(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            tokio::select! {
                _ = self.closed.cancelled() => return,
                _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        if !self.inner.status().connected() {
            return Ok(());
        }
        self.inner
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|err| TransportError::Channel(err.to_string()))
    }
}

struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn queue_bind(&self, queue: &str, routing_key: &str, exchange: &str) -> Result<()> {
        let bind_error = |err: lapin::Error| TransportError::Bind {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            reason: err.to_string(),
        };

        self.inner
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(bind_error)?;
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(bind_error)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let mut consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| TransportError::Consume {
                queue: queue.to_string(),
                reason: err.to_string(),
            })?;

        let (tx, stream) = DeliveryStream::channel();
        let queue = queue.to_string();
        tokio::spawn(async move {
            while let Some(item) = consumer.next().await {
                match item {
                    Ok(delivery) => {
                        if tx.send(convert_delivery(delivery)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(queue = %queue, error = %err, "amqp consumer stream failed");
                        break;
                    }
                }
            }
            debug!(queue = %queue, "amqp consumer stream ended");
        });

        Ok(stream)
    }

    async fn publish(&self, publishing: Publishing) -> Result<()> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(publishing.content_type.clone()))
            .with_delivery_mode(publishing.delivery_mode.as_u8());
        if let Some(correlation_id) = &publishing.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
        }

        self.inner
            .basic_publish(
                &publishing.exchange,
                &publishing.routing_key,
                BasicPublishOptions::default(),
                &publishing.body,
                properties,
            )
            .await
            .map(|_confirm| ())
            .map_err(|err| TransportError::Publish {
                routing_key: publishing.routing_key.clone(),
                reason: err.to_string(),
            })
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| TransportError::Channel(err.to_string()))
    }
}

fn convert_delivery(delivery: lapin::message::Delivery) -> Delivery {
    Delivery {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        correlation_id: delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string()),
        body: delivery.data.into(),
    }
}
