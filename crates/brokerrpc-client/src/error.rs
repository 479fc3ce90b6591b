use std::time::Duration;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The initial dial failed; the process should not start serving.
    #[error("bootstrap dial to {uri} failed: {source}")]
    Bootstrap {
        uri: String,
        #[source]
        source: brokerrpc_transport::TransportError,
    },

    /// The broker connection is down (reconnect in progress).
    #[error("connection lost")]
    ConnectionLost,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] brokerrpc_transport::TransportError),

    /// Frame encoding or decoding error.
    #[error("wire error: {0}")]
    Wire(#[from] brokerrpc_wire::WireError),

    /// Payload serialization/deserialization error.
    #[error("codec error: {0}")]
    Codec(String),

    /// No reply arrived before the deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// No pooled channel became available in time.
    #[error("channel pool exhausted (waited {0:?})")]
    PoolExhausted(Duration),

    /// Another in-flight call already owns the correlation key.
    #[error("correlation key {0} already has a waiter")]
    DuplicateCorrelation(String),

    /// The waiter was discarded before a reply arrived.
    #[error("reply channel closed before a reply arrived")]
    ReplyDropped,

    /// A reply was requested for a delivery without a correlation id.
    #[error("delivery has no correlation id")]
    MissingCorrelation,

    /// The component has been shut down.
    #[error("client shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ClientError>;
