use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// The broker's built-in direct exchange.
pub const DEFAULT_EXCHANGE: &str = "amq.direct";

/// Content type stamped on every published frame.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Broker-side persistence of a published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Kept in memory only (AMQP delivery mode 1).
    #[default]
    Transient,
    /// Written to disk by the broker (AMQP delivery mode 2).
    Persistent,
}

impl DeliveryMode {
    /// The AMQP `delivery-mode` property value.
    pub fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishing {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    pub correlation_id: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub content_type: String,
}

impl Publishing {
    /// Transient, uncorrelated message on `exchange` with `routing_key`.
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body: body.into(),
            correlation_id: None,
            delivery_mode: DeliveryMode::Transient,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Override the delivery mode.
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }
}

/// An inbound message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub body: Bytes,
}

impl Delivery {
    /// The correlation id, if present and non-empty.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Stream of deliveries for one consumer subscription.
///
/// Ends (yields `None`) when the subscription or its connection is lost.
#[derive(Debug)]
pub struct DeliveryStream {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl DeliveryStream {
    /// Create a connected sender/stream pair.
    pub fn channel() -> (mpsc::UnboundedSender<Delivery>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next delivery.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// Dials broker connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection to `uri`.
    async fn dial(&self, uri: &str) -> Result<Arc<dyn Connection>>;
}

/// One physical broker connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Whether the connection is known to be closed.
    fn is_closed(&self) -> bool;

    /// Open a new channel on this connection.
    async fn open_channel(&self) -> Result<Box<dyn Channel>>;

    /// Resolves once the connection has closed, for any reason.
    async fn closed(&self);

    /// Close the connection.
    async fn close(&self) -> Result<()>;
}

/// A multiplexed channel on a connection.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Bind `queue` to `routing_key` on `exchange`, declaring the queue durable.
    async fn queue_bind(&self, queue: &str, routing_key: &str, exchange: &str) -> Result<()>;

    /// Start an exclusive, auto-acknowledged subscription on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Publish a message.
    async fn publish(&self, publishing: Publishing) -> Result<()>;

    /// Close the channel.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_defaults_to_transient_uncorrelated() {
        let publishing = Publishing::new(DEFAULT_EXCHANGE, "F1S1", Bytes::from_static(b"x"));
        assert_eq!(publishing.delivery_mode, DeliveryMode::Transient);
        assert_eq!(publishing.delivery_mode.as_u8(), 1);
        assert!(publishing.correlation_id.is_none());
        assert_eq!(publishing.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn empty_correlation_id_is_absent() {
        let delivery = Delivery {
            delivery_tag: 1,
            exchange: DEFAULT_EXCHANGE.to_string(),
            routing_key: "F1S1".to_string(),
            correlation_id: Some(String::new()),
            body: Bytes::new(),
        };
        assert_eq!(delivery.correlation_id(), None);
    }

    #[tokio::test]
    async fn delivery_stream_ends_when_sender_dropped() {
        let (tx, mut stream) = DeliveryStream::channel();
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
