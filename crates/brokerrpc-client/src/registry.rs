//! In-flight call registry.
//!
//! Waiters are keyed by the first [`CORRELATION_KEY_LEN`] characters of the
//! correlation id. The same truncation is applied on registration and on
//! lookup, so callers never see the key directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{ClientError, Result};

/// Significant characters of a correlation id.
pub const CORRELATION_KEY_LEN: usize = 10;

/// Registry key for `correlation_id`: its first ten characters, or all of it
/// when shorter.
pub fn correlation_key(correlation_id: &str) -> &str {
    match correlation_id.char_indices().nth(CORRELATION_KEY_LEN) {
        Some((end, _)) => &correlation_id[..end],
        None => correlation_id,
    }
}

struct Slot {
    waiter_id: u64,
    tx: oneshot::Sender<Bytes>,
}

/// Map from correlation key to the waiter expecting its reply.
#[derive(Default)]
pub struct CorrelationRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    next_waiter_id: AtomicU64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `correlation_id`.
    ///
    /// The returned [`Waiter`] removes its entry when dropped.
    pub fn register(self: &Arc<Self>, correlation_id: &str) -> Result<Waiter> {
        let key = correlation_key(correlation_id).to_string();
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut slots = self.slots.lock();
        if slots.contains_key(&key) {
            return Err(ClientError::DuplicateCorrelation(key));
        }
        slots.insert(key.clone(), Slot { waiter_id, tx });
        drop(slots);

        trace!(correlation_key = %key, "waiter registered");
        Ok(Waiter {
            key,
            waiter_id,
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Hand `body` to the waiter for `correlation_id`.
    ///
    /// Returns `false` when no waiter is registered or it already gave up.
    pub fn resolve(&self, correlation_id: &str, body: Bytes) -> bool {
        let slot = self.slots.lock().remove(correlation_key(correlation_id));
        match slot {
            Some(slot) => slot.tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `correlation_id`, if any.
    pub fn remove(&self, correlation_id: &str) -> bool {
        self.slots
            .lock()
            .remove(correlation_key(correlation_id))
            .is_some()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.slots.lock().contains_key(correlation_key(correlation_id))
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &str, waiter_id: u64) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|slot| slot.waiter_id == waiter_id) {
            slots.remove(key);
        }
    }
}

/// Receiving half of a registered call.
pub struct Waiter {
    key: String,
    waiter_id: u64,
    rx: oneshot::Receiver<Bytes>,
    registry: Arc<CorrelationRegistry>,
}

impl Waiter {
    /// Truncated key this waiter is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the reply body.
    pub async fn recv(&mut self) -> Result<Bytes> {
        (&mut self.rx).await.map_err(|_| ClientError::ReplyDropped)
    }

    /// Wait for the reply body for at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.waiter_id);
    }
}
