//! Correlated RPC and notifications over a message broker.
//!
//! brokerrpc carries fixed-layout binary frames between services through a
//! direct exchange. Callers publish a request with a correlation id and wait
//! for the matching reply on their own queue; notifications are published
//! without waiting.
//!
//! # Crate Structure
//!
//! - [`wire`]: network/call headers and length-prefixed frames
//! - [`transport`]: broker abstraction, in-memory broker, AMQP adapter
//!   (behind `amqp` feature)
//! - [`client`]: sessions, channel pool, consumers, RPC and service calls
//!   (behind `client` feature)

/// Re-export wire types.
pub mod wire {
    pub use brokerrpc_wire::*;
}

/// Re-export transport types.
pub mod transport {
    pub use brokerrpc_transport::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use brokerrpc_client::*;
}
