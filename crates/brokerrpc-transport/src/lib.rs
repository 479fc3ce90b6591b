//! Broker client abstraction.
//!
//! Provides a unified interface over the broker client library:
//! - [`Connector`] dials connections
//! - [`Connection`] opens channels and reports closure
//! - [`Channel`] binds queues, consumes and publishes
//!
//! This is the lowest layer of brokerrpc. Two implementations ship here:
//! [`MemoryBroker`], an in-process direct-exchange broker, and (behind the
//! `amqp` feature) [`AmqpConnector`] backed by `lapin`.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use error::{Result, TransportError};
pub use memory::MemoryBroker;
pub use traits::{
    Channel, Connection, Connector, Delivery, DeliveryMode, DeliveryStream, Publishing,
    DEFAULT_CONTENT_TYPE, DEFAULT_EXCHANGE,
};

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
