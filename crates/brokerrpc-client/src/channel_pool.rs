//! Pool of broker channels over one reconnecting session.

use std::sync::Arc;

use async_trait::async_trait;
use brokerrpc_transport::Connector;
use tracing::{debug, info};

use crate::config::{PoolConfig, SessionConfig};
use crate::error::{ClientError, Result};
use crate::pool::{Manager, Pool, PoolStatus, Pooled};
use crate::session::{Session, SessionChannel};

/// Opens channels on a [`Session`] and checks them against its generation.
pub struct ChannelManager {
    session: Arc<Session>,
}

impl ChannelManager {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Manager for ChannelManager {
    type Resource = SessionChannel;

    async fn create(&self) -> Result<SessionChannel> {
        if !self.session.is_connected() {
            return Err(ClientError::ConnectionLost);
        }
        let channel = self
            .session
            .open_channel()
            .await
            .ok_or(ClientError::ConnectionLost)?;
        debug!(channel_id = channel.id(), generation = channel.generation(), "channel opened");
        Ok(channel)
    }

    fn is_valid(&self, channel: &SessionChannel) -> bool {
        self.session.is_channel_valid(channel)
    }

    async fn destroy(&self, channel: SessionChannel) {
        self.session.forget_channel(&channel);
        if let Err(err) = channel.close().await {
            debug!(channel_id = channel.id(), error = %err, "channel close failed");
        }
    }
}

/// A checked-out channel.
pub type PooledChannel = Pooled<ChannelManager>;

/// Session plus a bounded pool of its channels.
pub struct ChannelPool {
    session: Arc<Session>,
    pool: Pool<ChannelManager>,
}

impl ChannelPool {
    /// Dial the broker and pre-open `initial_cap` channels.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        uri: impl Into<String>,
        session_config: SessionConfig,
        pool_config: PoolConfig,
    ) -> Result<Arc<Self>> {
        let session = Session::connect(connector, uri, session_config).await?;
        let pool = match Pool::new(ChannelManager::new(Arc::clone(&session)), pool_config).await {
            Ok(pool) => pool,
            Err(err) => {
                session.shutdown().await;
                return Err(err);
            }
        };
        let config = pool.config();
        info!(
            initial = config.initial_cap,
            max_idle = config.max_idle,
            max_cap = config.max_cap,
            "channel pool ready"
        );
        Ok(Arc::new(Self { session, pool }))
    }

    /// Check out a healthy channel.
    pub async fn acquire(&self) -> Result<PooledChannel> {
        self.pool.acquire().await
    }

    /// Return a channel to the pool.
    pub fn release(&self, channel: PooledChannel) {
        self.pool.release(channel);
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Close idle channels and the session. Idempotent.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        self.session.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use brokerrpc_transport::MemoryBroker;

    use super::*;

    fn session_config() -> SessionConfig {
        SessionConfig::default().with_reconnect_delay(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn opens_initial_channels() {
        let broker = MemoryBroker::new();
        let pool = ChannelPool::connect(
            Arc::new(broker.clone()),
            "memory://",
            session_config(),
            PoolConfig::new(3, 6, 4),
        )
        .await
        .unwrap();
        assert_eq!(broker.open_channels(), 3);
        assert_eq!(pool.status().idle, 3);
        pool.shutdown().await;
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn stale_channels_are_replaced_after_reconnect() {
        let broker = MemoryBroker::new();
        let pool = ChannelPool::connect(
            Arc::new(broker.clone()),
            "memory://",
            session_config(),
            PoolConfig::new(2, 4, 2),
        )
        .await
        .unwrap();
        let before = pool.acquire().await.unwrap().generation();

        broker.sever_connections();
        for _ in 0..100 {
            if pool.session().generation() > before && pool.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let channel = pool.acquire().await.unwrap();
        assert!(channel.generation() > before);
        assert!(pool.session().is_channel_valid(&channel));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn acquire_fails_fast_while_disconnected() {
        let broker = MemoryBroker::new();
        let pool = ChannelPool::connect(
            Arc::new(broker.clone()),
            "memory://",
            session_config(),
            PoolConfig::new(1, 2, 1),
        )
        .await
        .unwrap();

        broker.set_reachable(false);
        broker.sever_connections();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, ClientError::ConnectionLost));
        assert_eq!(pool.status().in_use, 0);
        pool.shutdown().await;
    }
}
