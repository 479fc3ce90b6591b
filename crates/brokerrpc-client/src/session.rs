//! Reconnecting broker connection.
//!
//! A [`Session`] owns one live connection at a time. A watcher task waits for
//! the connection to close and redials with a fixed delay until it succeeds
//! or the session is shut down. Channels opened through the session carry the
//! generation they were opened under; a reconnect invalidates all of them.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use brokerrpc_transport::{Channel, Connection, Connector};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};

struct SessionState {
    connection: Option<Arc<dyn Connection>>,
    generation: u64,
    channels: HashSet<u64>,
}

/// A broker connection that heals itself.
pub struct Session {
    connector: Arc<dyn Connector>,
    uri: String,
    config: SessionConfig,
    state: Mutex<SessionState>,
    next_channel_id: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// A channel opened through a [`Session`].
///
/// Dereferences to the underlying [`Channel`].
pub struct SessionChannel {
    id: u64,
    generation: u64,
    inner: Box<dyn Channel>,
}

impl SessionChannel {
    /// Session-unique channel id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Connection generation the channel was opened under.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for SessionChannel {
    type Target = dyn Channel;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Session {
    /// Dial `uri` and start the reconnect watcher.
    ///
    /// A failed first dial is returned as [`ClientError::Bootstrap`]; no
    /// retry happens before the session exists.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        uri: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Arc<Self>> {
        let uri = uri.into();
        info!(uri = %uri, "connecting to broker");
        let connection = connector
            .dial(&uri)
            .await
            .map_err(|source| ClientError::Bootstrap {
                uri: uri.clone(),
                source,
            })?;
        info!(uri = %uri, "broker connection established");

        let session = Arc::new(Self {
            connector,
            uri,
            config,
            state: Mutex::new(SessionState {
                connection: Some(Arc::clone(&connection)),
                generation: 1,
                channels: HashSet::new(),
            }),
            next_channel_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            watcher: Mutex::new(None),
        });

        let handle = tokio::spawn(watch(
            Arc::downgrade(&session),
            session.shutdown.clone(),
            connection,
        ));
        *session.watcher.lock() = Some(handle);
        Ok(session)
    }

    /// Broker URI this session dials.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether a live connection is currently held.
    pub fn is_connected(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.state
            .lock()
            .connection
            .as_ref()
            .is_some_and(|connection| !connection.is_closed())
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of successful dials, starting at 1.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Open a channel on the current connection.
    ///
    /// Returns `None` while disconnected or when the connection refuses.
    pub async fn open_channel(&self) -> Option<SessionChannel> {
        let (connection, generation) = {
            let state = self.state.lock();
            (state.connection.clone()?, state.generation)
        };
        if connection.is_closed() || self.is_shutdown() {
            return None;
        }

        let inner = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                debug!(error = %err, "open channel failed");
                return None;
            }
        };

        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock();
        if state.generation != generation {
            // Reconnected while the channel was opening.
            return None;
        }
        state.channels.insert(id);
        Some(SessionChannel {
            id,
            generation,
            inner,
        })
    }

    /// Whether `channel` belongs to the live connection.
    pub fn is_channel_valid(&self, channel: &SessionChannel) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let state = self.state.lock();
        let live = state
            .connection
            .as_ref()
            .is_some_and(|connection| !connection.is_closed());
        live && state.generation == channel.generation && state.channels.contains(&channel.id)
    }

    /// Drop `channel` from the membership set.
    pub fn forget_channel(&self, channel: &SessionChannel) {
        self.state.lock().channels.remove(&channel.id);
    }

    /// Stop the watcher and close the connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let connection = {
            let mut state = self.state.lock();
            state.channels.clear();
            state.connection.take()
        };
        if let Some(connection) = connection {
            if let Err(err) = connection.close().await {
                debug!(error = %err, "connection close failed");
            }
        }

        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            let _ = handle.await;
        }
        info!(uri = %self.uri, "session shut down");
    }

    /// Redial until a connection is established or the session stops.
    async fn reconnect(&self) -> Option<Arc<dyn Connection>> {
        {
            let mut state = self.state.lock();
            state.connection = None;
            state.channels.clear();
        }

        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }

            let dialed = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                dialed = self.connector.dial(&self.uri) => dialed,
            };

            match dialed {
                Ok(connection) => {
                    let generation = self.install(Arc::clone(&connection)).await?;
                    info!(uri = %self.uri, generation, "reconnected to broker");
                    return Some(connection);
                }
                Err(err) => {
                    warn!(
                        uri = %self.uri,
                        error = %err,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "reconnect failed"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    /// Make `connection` the live one and bump the generation.
    ///
    /// If shutdown has already run, the connection is closed instead.
    async fn install(&self, connection: Arc<dyn Connection>) -> Option<u64> {
        {
            let mut state = self.state.lock();
            if !self.closed.load(Ordering::SeqCst) {
                state.connection = Some(connection);
                state.generation += 1;
                return Some(state.generation);
            }
        }
        debug!(uri = %self.uri, "session shut down during redial, closing new connection");
        if let Err(err) = connection.close().await {
            debug!(error = %err, "connection close failed");
        }
        None
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn watch(
    session: Weak<Session>,
    shutdown: CancellationToken,
    mut connection: Arc<dyn Connection>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = connection.closed() => {}
        }

        let Some(live) = session.upgrade() else {
            break;
        };
        if live.shutdown.is_cancelled() {
            break;
        }
        warn!(uri = %live.uri, "broker connection lost, reconnecting");
        match live.reconnect().await {
            Some(next) => connection = next,
            None => break,
        }
    }
    debug!("session watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use brokerrpc_transport::MemoryBroker;

    use super::*;

    fn fast() -> SessionConfig {
        SessionConfig::default().with_reconnect_delay(Duration::from_millis(20))
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn bootstrap_failure_is_reported() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let err = Session::connect(Arc::new(broker), "memory://", fast())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Bootstrap { .. }));
    }

    #[tokio::test]
    async fn channels_are_tracked_per_generation() {
        let broker = MemoryBroker::new();
        let session = Session::connect(Arc::new(broker.clone()), "memory://", fast())
            .await
            .unwrap();
        assert!(session.is_connected());
        assert_eq!(session.generation(), 1);

        let channel = session.open_channel().await.unwrap();
        assert!(session.is_channel_valid(&channel));

        broker.sever_connections();
        assert!(wait_until(|| session.generation() == 2).await);
        assert!(session.is_connected());
        assert!(!session.is_channel_valid(&channel));

        let fresh = session.open_channel().await.unwrap();
        assert!(session.is_channel_valid(&fresh));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn keeps_redialing_until_broker_returns() {
        let broker = MemoryBroker::new();
        let session = Session::connect(Arc::new(broker.clone()), "memory://", fast())
            .await
            .unwrap();

        broker.set_reachable(false);
        broker.sever_connections();
        assert!(wait_until(|| !session.is_connected()).await);
        assert!(session.open_channel().await.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        broker.set_reachable(true);
        assert!(wait_until(|| session.is_connected()).await);
        assert!(broker.dial_count() >= 2);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_reconnects() {
        let broker = MemoryBroker::new();
        let session = Session::connect(Arc::new(broker.clone()), "memory://", fast())
            .await
            .unwrap();
        session.shutdown().await;
        session.shutdown().await;
        assert!(!session.is_connected());
        assert!(session.open_channel().await.is_none());

        let dials = broker.dial_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.dial_count(), dials);
    }

    #[tokio::test]
    async fn redial_finishing_after_shutdown_is_closed() {
        let broker = MemoryBroker::new();
        let session = Session::connect(Arc::new(broker.clone()), "memory://", fast())
            .await
            .unwrap();
        session.shutdown().await;
        assert_eq!(broker.connection_count(), 0);

        let late = broker.dial("memory://").await.unwrap();
        assert!(session.install(Arc::clone(&late)).await.is_none());
        assert!(late.is_closed());
        assert_eq!(broker.connection_count(), 0);
        assert!(!session.is_connected());
        assert_eq!(session.generation(), 1);
    }

    #[tokio::test]
    async fn forgotten_channel_is_invalid() {
        let broker = MemoryBroker::new();
        let session = Session::connect(Arc::new(broker), "memory://", fast())
            .await
            .unwrap();
        let channel = session.open_channel().await.unwrap();
        session.forget_channel(&channel);
        assert!(!session.is_channel_valid(&channel));
        session.shutdown().await;
    }
}
