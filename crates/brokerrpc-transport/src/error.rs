/// Errors that can occur in broker transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish a connection to the broker.
    #[error("failed to dial {uri}: {reason}")]
    Dial { uri: String, reason: String },

    /// The broker is not accepting connections at all.
    #[error("broker unreachable at {uri}")]
    Unreachable { uri: String },

    /// The connection (or the channel's connection) is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to open or use a channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Failed to bind a queue to a routing key.
    #[error("failed to bind queue {queue} to {routing_key}: {reason}")]
    Bind {
        queue: String,
        routing_key: String,
        reason: String,
    },

    /// Failed to start consuming from a queue.
    #[error("failed to consume from {queue}: {reason}")]
    Consume { queue: String, reason: String },

    /// Failed to publish a message.
    #[error("failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
