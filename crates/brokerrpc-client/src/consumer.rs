//! Inbound queue consumer.
//!
//! A [`Consumer`] binds one queue, reads deliveries on a background task and
//! routes each one:
//!
//! 1. a correlated, non-empty delivery whose key has a waiter resolves it;
//! 2. otherwise, if a handler is configured it runs on its own task;
//! 3. otherwise the delivery is dropped.
//!
//! When the delivery stream ends the consumer waits the reconnect delay and
//! re-subscribes, repeating until it succeeds or is shut down.

use std::sync::Arc;
use std::time::Duration;

use brokerrpc_transport::{Connector, Delivery, DeliveryStream};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, SessionConfig};
use crate::error::{ClientError, Result};
use crate::handler::{spawn_handler, DeliveryHandler};
use crate::registry::CorrelationRegistry;
use crate::session::{Session, SessionChannel};

/// Lifecycle of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Initializing,
    Subscribed,
    Reconnecting,
    Closed,
}

struct ConsumerInner {
    session: Arc<Session>,
    config: ConsumerConfig,
    reconnect_delay: Duration,
    registry: Arc<CorrelationRegistry>,
    handler: Option<Arc<dyn DeliveryHandler>>,
    state: watch::Sender<ConsumerState>,
    shutdown: CancellationToken,
}

/// A reconnecting subscription to one queue.
pub struct Consumer {
    inner: Arc<ConsumerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    /// Dial, bind `config.queue` and start the read loop.
    ///
    /// Fails if the first dial or subscription fails.
    ///
    /// A correlated delivery with no matching waiter goes to `handler` when
    /// one is given, so requests carrying a correlation id reach responders.
    /// A reply arriving after its call timed out therefore also reaches the
    /// handler; with `handler = None` it is dropped. Reply queues used only
    /// for [`RpcClient::call`](crate::RpcClient::call) should pass `None`.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        uri: impl Into<String>,
        session_config: SessionConfig,
        config: ConsumerConfig,
        handler: Option<Arc<dyn DeliveryHandler>>,
    ) -> Result<Arc<Self>> {
        let reconnect_delay = session_config.reconnect_delay;
        let session = Session::connect(connector, uri, session_config).await?;
        let (state, _) = watch::channel(ConsumerState::Initializing);
        let inner = Arc::new(ConsumerInner {
            session,
            config,
            reconnect_delay,
            registry: Arc::new(CorrelationRegistry::new()),
            handler,
            state,
            shutdown: CancellationToken::new(),
        });

        let (channel, stream) = match inner.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(queue = %inner.config.queue, error = %err, "initial subscribe failed");
                inner.session.shutdown().await;
                return Err(err);
            }
        };
        inner.state.send_replace(ConsumerState::Subscribed);

        let task = tokio::spawn(Arc::clone(&inner).run(channel, stream));
        Ok(Arc::new(Self {
            inner,
            task: Mutex::new(Some(task)),
        }))
    }

    /// Waiters for replies arriving on this queue.
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn state(&self) -> ConsumerState {
        *self.inner.state.borrow()
    }

    /// Whether the connection is up and the consumer has not been closed.
    pub fn is_connected(&self) -> bool {
        self.state() != ConsumerState::Closed && self.inner.session.is_connected()
    }

    /// Wait until the consumer reaches `target`, for at most `timeout`.
    pub async fn wait_for_state(&self, target: ConsumerState, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        let reached = tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow_and_update() == target {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;
        matches!(reached, Ok(true))
    }

    /// Stop the read loop and close the session. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.session.shutdown().await;
        self.inner.state.send_replace(ConsumerState::Closed);
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl ConsumerInner {
    async fn subscribe(&self) -> Result<(SessionChannel, DeliveryStream)> {
        if !self.session.is_connected() {
            return Err(ClientError::ConnectionLost);
        }
        let channel = self
            .session
            .open_channel()
            .await
            .ok_or(ClientError::ConnectionLost)?;

        let queue = &self.config.queue;
        channel
            .queue_bind(queue, &self.config.routing_key, &self.config.exchange)
            .await?;
        debug!(
            queue = %queue,
            routing_key = %self.config.routing_key,
            exchange = %self.config.exchange,
            "queue bound"
        );

        let stream = channel.consume(queue, &self.config.consumer_tag()).await?;
        info!(queue = %queue, generation = channel.generation(), "consumer subscribed");
        Ok((channel, stream))
    }

    async fn run(self: Arc<Self>, mut channel: SessionChannel, mut stream: DeliveryStream) {
        loop {
            self.read(&mut stream).await;
            if self.shutdown.is_cancelled() {
                break;
            }

            warn!(queue = %self.config.queue, "delivery stream ended, resubscribing");
            self.state.send_replace(ConsumerState::Reconnecting);
            match self.resubscribe().await {
                Some((next_channel, next_stream)) => {
                    channel = next_channel;
                    stream = next_stream;
                    self.state.send_replace(ConsumerState::Subscribed);
                }
                None => break,
            }
        }

        self.session.forget_channel(&channel);
        if let Err(err) = channel.close().await {
            debug!(error = %err, "consumer channel close failed");
        }
        self.state.send_replace(ConsumerState::Closed);
        info!(queue = %self.config.queue, "consumer stopped");
    }

    async fn read(&self, stream: &mut DeliveryStream) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(delivery) => self.dispatch(delivery),
                None => return,
            }
        }
    }

    async fn resubscribe(&self) -> Option<(SessionChannel, DeliveryStream)> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
            match self.subscribe().await {
                Ok(subscription) => return Some(subscription),
                Err(err) => warn!(
                    queue = %self.config.queue,
                    error = %err,
                    retry_in_ms = self.reconnect_delay.as_millis() as u64,
                    "resubscribe failed"
                ),
            }
        }
    }

    fn dispatch(&self, delivery: Delivery) {
        debug!(
            queue = %self.config.queue,
            delivery_tag = delivery.delivery_tag,
            bytes = delivery.body.len(),
            correlation_id = delivery.correlation_id().unwrap_or(""),
            "delivery received"
        );

        if let Some(correlation_id) = delivery.correlation_id() {
            if !delivery.body.is_empty()
                && self.registry.resolve(correlation_id, delivery.body.clone())
            {
                return;
            }
        }

        if let Some(handler) = &self.handler {
            spawn_handler(Arc::clone(handler), delivery);
            return;
        }

        match delivery.correlation_id() {
            Some(correlation_id) => debug!(correlation_id, "no waiter for reply, dropping"),
            None => debug!(
                delivery_tag = delivery.delivery_tag,
                "no handler configured, dropping"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use brokerrpc_transport::{MemoryBroker, Publishing, DEFAULT_EXCHANGE};
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::handler::handler_fn;

    fn session_config() -> SessionConfig {
        SessionConfig::default().with_reconnect_delay(Duration::from_millis(20))
    }

    async fn start(
        broker: &MemoryBroker,
        handler: Option<Arc<dyn DeliveryHandler>>,
    ) -> Arc<Consumer> {
        Consumer::connect(
            Arc::new(broker.clone()),
            "memory://",
            session_config(),
            ConsumerConfig::new("worker", "F5S1"),
            handler,
        )
        .await
        .unwrap()
    }

    fn publish(broker: &MemoryBroker, body: &'static [u8], correlation_id: Option<&str>) {
        let mut publishing = Publishing::new(DEFAULT_EXCHANGE, "F5S1", Bytes::from_static(body));
        if let Some(id) = correlation_id {
            publishing = publishing.with_correlation_id(id);
        }
        broker.publish(publishing);
    }

    #[tokio::test]
    async fn reply_resolves_waiter_instead_of_handler() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = start(
            &broker,
            Some(handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    tx.send(delivery.body)?;
                    Ok(())
                }
            })),
        )
        .await;
        assert!(
            consumer
                .wait_for_state(ConsumerState::Subscribed, Duration::from_millis(100))
                .await
        );

        let waiter = consumer.registry().register("1700000100").unwrap();
        publish(&broker, b"reply", Some("1700000100"));
        let body = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&body[..], b"reply");

        publish(&broker, b"work", None);
        let handled = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&handled[..], b"work");
        consumer.shutdown().await;
    }

    #[tokio::test]
    async fn empty_correlated_body_goes_to_handler() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = start(
            &broker,
            Some(handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    tx.send(delivery.correlation_id)?;
                    Ok(())
                }
            })),
        )
        .await;

        let _waiter = consumer.registry().register("1700000200").unwrap();
        publish(&broker, b"", Some("1700000200"));
        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.as_deref(), Some("1700000200"));
        assert!(consumer.registry().contains("1700000200"));
        consumer.shutdown().await;
    }

    #[tokio::test]
    async fn late_reply_reaches_handler_or_is_dropped() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = start(
            &broker,
            Some(handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    tx.send(delivery.body)?;
                    Ok(())
                }
            })),
        )
        .await;

        // The waiter is gone, as after a timed-out call.
        drop(consumer.registry().register("1700000300").unwrap());
        publish(&broker, b"late", Some("1700000300"));
        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&seen[..], b"late");
        assert!(consumer.registry().is_empty());
        consumer.shutdown().await;

        let replies = start(&broker, None).await;
        publish(&broker, b"late", Some("1700000301"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.queue_depth("worker"), 0);
        assert_eq!(replies.state(), ConsumerState::Subscribed);
        assert!(replies.registry().is_empty());
        replies.shutdown().await;
    }

    #[tokio::test]
    async fn resubscribes_after_connection_loss() {
        let broker = MemoryBroker::new();
        let consumer = start(&broker, None).await;

        broker.sever_connections();
        let mut resubscribed = false;
        for _ in 0..200 {
            if consumer.session().generation() == 2
                && consumer.state() == ConsumerState::Subscribed
                && broker.has_consumer("worker")
            {
                resubscribed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(resubscribed);

        let waiter = consumer.registry().register("1700000300").unwrap();
        publish(&broker, b"after", Some("1700000300"));
        assert!(waiter.wait(Duration::from_secs(1)).await.is_ok());
        consumer.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_consumer() {
        let broker = MemoryBroker::new();
        let consumer = start(&broker, None).await;
        consumer.shutdown().await;
        consumer.shutdown().await;
        assert_eq!(consumer.state(), ConsumerState::Closed);
        assert!(!consumer.is_connected());
        assert!(!broker.has_consumer("worker"));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_connect() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let err = Consumer::connect(
            Arc::new(broker),
            "memory://",
            session_config(),
            ConsumerConfig::new("worker", "F5S1"),
            None,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::Bootstrap { .. }));
    }
}
