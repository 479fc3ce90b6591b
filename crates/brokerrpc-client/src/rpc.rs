//! Fire-and-forget publishes and correlated request/reply calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use brokerrpc_transport::{Publishing, DEFAULT_EXCHANGE};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::channel_pool::ChannelPool;
use crate::consumer::Consumer;
use crate::error::{ClientError, Result};

/// Publisher and caller over a channel pool and a reply consumer.
pub struct RpcClient {
    pool: Arc<ChannelPool>,
    consumer: Option<Arc<Consumer>>,
    exchange: String,
    next_correlation: AtomicU64,
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl RpcClient {
    /// Notify-only client; [`call`](Self::call) always fails with
    /// [`ClientError::ConnectionLost`].
    pub fn producer(pool: Arc<ChannelPool>) -> Self {
        Self {
            pool,
            consumer: None,
            exchange: DEFAULT_EXCHANGE.to_string(),
            next_correlation: AtomicU64::new(unix_seconds()),
        }
    }

    /// Client whose calls wait for replies on `consumer`.
    pub fn new(pool: Arc<ChannelPool>, consumer: Arc<Consumer>) -> Self {
        Self {
            consumer: Some(consumer),
            ..Self::producer(pool)
        }
    }

    /// Publish on `exchange` instead of the direct exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Start correlation ids after `seed` instead of the current time.
    pub fn with_correlation_seed(self, seed: u64) -> Self {
        self.next_correlation.store(seed, Ordering::SeqCst);
        self
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    pub fn consumer(&self) -> Option<&Arc<Consumer>> {
        self.consumer.as_ref()
    }

    fn next_correlation_id(&self) -> String {
        (self.next_correlation.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Publish `body` to `routing_key` without waiting for a reply.
    pub async fn notify(&self, body: Bytes, routing_key: &str) -> Result<()> {
        let started = Instant::now();
        let size = body.len();
        self.publish(Publishing::new(&self.exchange, routing_key, body))
            .await?;
        debug!(
            routing_key,
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "notify published"
        );
        Ok(())
    }

    /// Publish `body` to `routing_key` and wait up to `timeout` for the
    /// correlated reply body.
    ///
    /// `timeout` bounds the whole call: waiting for a pooled channel, the
    /// publish and the reply. The waiter is registered before publishing and
    /// is removed on every exit path.
    pub async fn call(&self, body: Bytes, routing_key: &str, timeout: Duration) -> Result<Bytes> {
        let consumer = match &self.consumer {
            Some(consumer) if consumer.is_connected() => consumer,
            _ => {
                warn!(routing_key, "call rejected: reply consumer not connected");
                return Err(ClientError::ConnectionLost);
            }
        };

        let started = Instant::now();
        let correlation_id = self.next_correlation_id();
        let mut waiter = consumer.registry().register(&correlation_id)?;

        let publishing =
            Publishing::new(&self.exchange, routing_key, body).with_correlation_id(&correlation_id);
        let exchange = async {
            self.publish(publishing).await?;
            debug!(correlation_id = %correlation_id, routing_key, "request published");
            waiter.recv().await
        };

        let elapsed_ms = || started.elapsed().as_millis() as u64;
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => {
                debug!(
                    correlation_id = %correlation_id,
                    routing_key,
                    bytes = reply.len(),
                    elapsed_ms = elapsed_ms(),
                    "reply received"
                );
                Ok(reply)
            }
            Ok(Err(err)) => {
                warn!(
                    correlation_id = %correlation_id,
                    routing_key,
                    elapsed_ms = elapsed_ms(),
                    error = %err,
                    "call failed"
                );
                Err(err)
            }
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    routing_key,
                    elapsed_ms = elapsed_ms(),
                    "call timed out"
                );
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Publish `body` to `routing_key` carrying `correlation_id`, answering
    /// a call made by a peer.
    pub async fn reply(&self, correlation_id: &str, routing_key: &str, body: Bytes) -> Result<()> {
        let publishing =
            Publishing::new(&self.exchange, routing_key, body).with_correlation_id(correlation_id);
        self.publish(publishing).await?;
        debug!(correlation_id, routing_key, "reply published");
        Ok(())
    }

    async fn publish(&self, publishing: Publishing) -> Result<()> {
        let channel = self.pool.acquire().await.map_err(|err| {
            warn!(routing_key = %publishing.routing_key, error = %err, "no channel for publish");
            err
        })?;
        let routing_key = publishing.routing_key.clone();
        let published = channel.publish(publishing).await;
        self.pool.release(channel);
        published.map_err(|err| {
            warn!(routing_key = %routing_key, error = %err, "publish failed");
            ClientError::from(err)
        })
    }

    /// Stop the reply consumer and the channel pool.
    pub async fn shutdown(&self) {
        if let Some(consumer) = &self.consumer {
            consumer.shutdown().await;
        }
        self.pool.shutdown().await;
    }
}
