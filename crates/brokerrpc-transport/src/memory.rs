use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{Channel, Connection, Connector, Delivery, DeliveryStream, Publishing};

/// In-process broker with direct-exchange routing.
///
/// Queues are durable for the broker's lifetime: messages routed to a queue
/// with no attached consumer are kept until one subscribes. Exposes fault
/// injection (`sever_connections`, `set_reachable`) and channel accounting so
/// reconnect and pooling behavior can be exercised without a real broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    unreachable: AtomicBool,
    next_connection_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    dials: AtomicUsize,
    published: AtomicUsize,
    open_channels: AtomicUsize,
    peak_open_channels: AtomicUsize,
}

#[derive(Default)]
struct BrokerState {
    bindings: HashMap<(String, String), HashSet<String>>,
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, CancellationToken>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Delivery>,
    consumer: Option<QueueConsumer>,
}

struct QueueConsumer {
    connection_id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl MemoryBroker {
    /// Create an empty, reachable broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent dials succeed (`true`) or fail (`false`).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Close every live connection, ending their consumer streams.
    pub fn sever_connections(&self) {
        let mut state = self.inner.state.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            close_connection(&mut state, id);
        }
        info!("memory broker severed all connections");
    }

    /// Route a message as if published by a peer service.
    pub fn publish(&self, publishing: Publishing) {
        self.inner.route(publishing);
    }

    /// Number of successful dials so far.
    pub fn dial_count(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }

    /// Number of messages published through any channel or [`Self::publish`].
    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Channels currently open (not closed and not dropped).
    pub fn open_channels(&self) -> usize {
        self.inner.open_channels.load(Ordering::SeqCst)
    }

    /// Highest number of channels open at the same time.
    pub fn peak_open_channels(&self) -> usize {
        self.inner.peak_open_channels.load(Ordering::SeqCst)
    }

    /// Live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    /// Whether `queue` currently has a consumer attached.
    pub fn has_consumer(&self, queue: &str) -> bool {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .is_some_and(|q| q.consumer.is_some())
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn Connection>> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable {
                uri: uri.to_string(),
            });
        }

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let closed = CancellationToken::new();
        self.inner.state.lock().connections.insert(id, closed.clone());
        self.inner.dials.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = id, uri, "memory broker accepted connection");

        Ok(Arc::new(MemoryConnection {
            id,
            closed,
            broker: Arc::clone(&self.inner),
        }))
    }
}

impl BrokerInner {
    fn route(&self, publishing: Publishing) {
        self.published.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        let key = (publishing.exchange.clone(), publishing.routing_key.clone());
        let queues: Vec<String> = match state.bindings.get(&key) {
            Some(queues) => queues.iter().cloned().collect(),
            None => {
                debug!(
                    exchange = %publishing.exchange,
                    routing_key = %publishing.routing_key,
                    "unroutable message dropped"
                );
                return;
            }
        };

        for name in queues {
            let delivery = Delivery {
                delivery_tag: self.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1,
                exchange: publishing.exchange.clone(),
                routing_key: publishing.routing_key.clone(),
                correlation_id: publishing.correlation_id.clone(),
                body: publishing.body.clone(),
            };
            let queue = state.queues.entry(name).or_default();
            let undelivered = match &queue.consumer {
                Some(consumer) => consumer.tx.send(delivery).err().map(|err| err.0),
                None => Some(delivery),
            };
            if let Some(delivery) = undelivered {
                queue.consumer = None;
                queue.backlog.push_back(delivery);
            }
        }
    }

    fn channel_opened(&self) {
        let open = self.open_channels.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open_channels.fetch_max(open, Ordering::SeqCst);
    }

    fn channel_closed(&self) {
        self.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

fn close_connection(state: &mut BrokerState, id: u64) {
    if let Some(token) = state.connections.remove(&id) {
        token.cancel();
    }
    for queue in state.queues.values_mut() {
        if queue
            .consumer
            .as_ref()
            .is_some_and(|consumer| consumer.connection_id == id)
        {
            queue.consumer = None;
        }
    }
}

struct MemoryConnection {
    id: u64,
    closed: CancellationToken,
    broker: Arc<BrokerInner>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        self.broker.channel_opened();
        Ok(Box::new(MemoryChannel {
            connection_id: self.id,
            connection_closed: self.closed.clone(),
            closed: AtomicBool::new(false),
            broker: Arc::clone(&self.broker),
        }))
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.broker.state.lock();
        close_connection(&mut state, self.id);
        Ok(())
    }
}

struct MemoryChannel {
    connection_id: u64,
    connection_closed: CancellationToken,
    closed: AtomicBool,
    broker: Arc<BrokerInner>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.connection_closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn queue_bind(&self, queue: &str, routing_key: &str, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        state.queues.entry(queue.to_string()).or_default();
        state
            .bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let live: HashSet<u64> = state.connections.keys().copied().collect();
        let entry = state.queues.entry(queue.to_string()).or_default();

        if let Some(existing) = &entry.consumer {
            if live.contains(&existing.connection_id) && !existing.tx.is_closed() {
                return Err(TransportError::Consume {
                    queue: queue.to_string(),
                    reason: "queue has an exclusive consumer".to_string(),
                });
            }
        }

        let (tx, stream) = DeliveryStream::channel();
        while let Some(delivery) = entry.backlog.pop_front() {
            // Receiver is alive in this scope.
            let _ = tx.send(delivery);
        }
        entry.consumer = Some(QueueConsumer {
            connection_id: self.connection_id,
            tx,
        });
        debug!(queue, consumer_tag, "memory broker consumer attached");
        Ok(stream)
    }

    async fn publish(&self, publishing: Publishing) -> Result<()> {
        self.ensure_open()?;
        self.broker.route(publishing);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.channel_closed();
        }
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.channel_closed();
        }
    }
}
