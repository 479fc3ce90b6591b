//! Correlated RPC and notifications over a message broker.
//!
//! Builds on `brokerrpc-transport` to provide:
//! - [`Session`]: one connection with automatic fixed-delay reconnect
//! - [`ChannelPool`]: bounded, health-checked channel reuse
//! - [`Consumer`]: queue subscription that resolves waiting calls and
//!   dispatches everything else to a [`DeliveryHandler`]
//! - [`RpcClient`]: `notify` and `call` with timeout
//! - [`ServiceClient`] / [`Responder`]: framed, typed calls and replies
//!   with JSON or (feature `prost`) protobuf bodies
//!
//! Every component is a lifecycle object with an idempotent `shutdown`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use brokerrpc_client::{
//!     ChannelPool, Consumer, ConsumerConfig, PoolConfig, RpcClient, SessionConfig,
//! };
//! use brokerrpc_transport::MemoryBroker;
//! use bytes::Bytes;
//!
//! # async fn example() -> brokerrpc_client::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let pool = ChannelPool::connect(
//!     broker.clone(),
//!     "memory://",
//!     SessionConfig::default(),
//!     PoolConfig::default(),
//! )
//! .await?;
//! let replies = Consumer::connect(
//!     broker,
//!     "memory://",
//!     SessionConfig::default(),
//!     ConsumerConfig::new("replies.F9S1", "F9S1"),
//!     None,
//! )
//! .await?;
//!
//! let rpc = RpcClient::new(pool, replies);
//! let reply = rpc
//!     .call(Bytes::from_static(b"ping"), "F40S2", Duration::from_secs(3))
//!     .await?;
//! println!("{} reply bytes", reply.len());
//! rpc.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod channel_pool;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod pool;
pub mod registry;
pub mod rpc;
pub mod service;
pub mod session;

pub use channel_pool::{ChannelManager, ChannelPool, PooledChannel};
pub use codec::{JsonCodec, PayloadCodec};
#[cfg(feature = "prost")]
pub use codec::ProstCodec;
pub use config::{
    ConsumerConfig, PoolConfig, ServiceConfig, SessionConfig, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_CALL_TIMEOUT, DEFAULT_INITIAL_CAP, DEFAULT_MAX_CAP, DEFAULT_MAX_IDLE,
    DEFAULT_RECONNECT_DELAY,
};
pub use consumer::{Consumer, ConsumerState};
pub use error::{ClientError, Result};
pub use handler::{handler_fn, DeliveryHandler, HandlerError};
pub use pool::{Manager, Pool, PoolStatus, Pooled};
pub use registry::{correlation_key, CorrelationRegistry, Waiter, CORRELATION_KEY_LEN};
pub use rpc::RpcClient;
pub use service::{Responder, ServiceClient};
pub use session::{Session, SessionChannel};
