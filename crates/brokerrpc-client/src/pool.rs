//! Bounded resource pool with health-checked reuse.
//!
//! At most `max_cap` resources exist at once. A semaphore hands out one
//! permit per live resource; idle resources wait in a FIFO list and are
//! validated before reuse. Released resources beyond `max_idle` are
//! destroyed.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::error::{ClientError, Result};

/// Creates, validates and destroys pooled resources.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Create a fresh resource.
    async fn create(&self) -> Result<Self::Resource>;

    /// Health check run before reuse and on release.
    fn is_valid(&self, resource: &Self::Resource) -> bool;

    /// Release a resource for good.
    async fn destroy(&self, resource: Self::Resource);
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Resources waiting for reuse.
    pub idle: usize,
    /// Resources currently checked out.
    pub in_use: usize,
    /// Configured capacity.
    pub max_cap: usize,
}

struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    idle: Mutex<VecDeque<M::Resource>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl<M: Manager> PoolInner<M> {
    fn put_back(self: &Arc<Self>, resource: M::Resource) {
        let keep = !self.closed.load(Ordering::SeqCst) && self.manager.is_valid(&resource);
        let rejected = if keep {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.max_idle {
                idle.push_back(resource);
                None
            } else {
                Some(resource)
            }
        } else {
            Some(resource)
        };

        if let Some(resource) = rejected {
            trace!("destroying released resource");
            self.destroy_later(resource);
        }
    }

    fn destroy_later(self: &Arc<Self>, resource: M::Resource) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move { inner.manager.destroy(resource).await });
            }
            Err(_) => debug!("no runtime to destroy released resource; dropping it"),
        }
    }
}

/// A bounded pool of `M::Resource`.
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manager> Pool<M> {
    /// Create the pool and pre-fill `initial_cap` resources.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self> {
        let config = config.resolved();
        let pool = Self {
            inner: Arc::new(PoolInner {
                manager,
                config,
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                permits: Arc::new(Semaphore::new(config.max_cap)),
                closed: AtomicBool::new(false),
            }),
        };

        for _ in 0..config.initial_cap {
            let resource = pool.inner.manager.create().await?;
            pool.inner.idle.lock().push_back(resource);
        }
        debug!(
            initial = config.initial_cap,
            max_idle = config.max_idle,
            max_cap = config.max_cap,
            "pool ready"
        );
        Ok(pool)
    }

    /// Effective configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a resource, reusing a healthy idle one when possible.
    ///
    /// Waits up to `acquire_timeout` for capacity before failing with
    /// [`ClientError::PoolExhausted`].
    pub async fn acquire(&self) -> Result<Pooled<M>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Shutdown);
        }

        let wait = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(wait, Arc::clone(&self.inner.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ClientError::Shutdown),
            Err(_) => return Err(ClientError::PoolExhausted(wait)),
        };

        loop {
            let candidate = self.inner.idle.lock().pop_front();
            match candidate {
                Some(resource) if self.inner.manager.is_valid(&resource) => {
                    return Ok(Pooled::new(resource, permit, Arc::clone(&self.inner)));
                }
                Some(resource) => {
                    debug!("evicting unhealthy idle resource");
                    self.inner.manager.destroy(resource).await;
                }
                None => break,
            }
        }

        let resource = self.inner.manager.create().await?;
        Ok(Pooled::new(resource, permit, Arc::clone(&self.inner)))
    }

    /// Return a resource. Equivalent to dropping it.
    pub fn release(&self, pooled: Pooled<M>) {
        drop(pooled);
    }

    /// Current counters.
    pub fn status(&self) -> PoolStatus {
        let max_cap = self.inner.config.max_cap;
        PoolStatus {
            idle: self.inner.idle.lock().len(),
            in_use: max_cap - self.inner.permits.available_permits(),
            max_cap,
        }
    }

    /// Refuse new checkouts and destroy idle resources.
    ///
    /// Checked-out resources are destroyed when they are released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let drained: Vec<M::Resource> = self.inner.idle.lock().drain(..).collect();
        for resource in drained {
            self.inner.manager.destroy(resource).await;
        }
    }
}

/// A checked-out resource. Returns to the pool on drop.
pub struct Pooled<M: Manager> {
    resource: Option<M::Resource>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<M>>,
}

impl<M: Manager> Pooled<M> {
    fn new(resource: M::Resource, permit: OwnedSemaphorePermit, pool: Arc<PoolInner<M>>) -> Self {
        Self {
            resource: Some(resource),
            permit: Some(permit),
            pool,
        }
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource taken before drop"),
        }
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.put_back(resource);
        }
        // Permit goes back only after the resource is idle again.
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct Counter {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        healthy: AtomicBool,
    }

    struct TestManager(Arc<Counter>);

    #[async_trait]
    impl Manager for TestManager {
        type Resource = usize;

        async fn create(&self) -> Result<usize> {
            Ok(self.0.created.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn is_valid(&self, _resource: &usize) -> bool {
            self.0.healthy.load(Ordering::SeqCst)
        }

        async fn destroy(&self, _resource: usize) {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> Arc<Counter> {
        let counter = Arc::new(Counter::default());
        counter.healthy.store(true, Ordering::SeqCst);
        counter
    }

    fn config(initial: usize, max_cap: usize, max_idle: usize) -> PoolConfig {
        PoolConfig::new(initial, max_cap, max_idle).with_acquire_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn prefills_and_reuses_idle() {
        let counter = counter();
        let pool = Pool::new(TestManager(counter.clone()), config(2, 4, 2))
            .await
            .unwrap();
        assert_eq!(counter.created.load(Ordering::SeqCst), 2);

        let first = pool.acquire().await.unwrap();
        assert_eq!(*first, 1);
        pool.release(first);

        let again = pool.acquire().await.unwrap();
        assert_eq!(*again, 2);
        assert_eq!(counter.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let counter = counter();
        let pool = Pool::new(TestManager(counter), config(1, 2, 2)).await.unwrap();

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.status().in_use, 2);

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, ClientError::PoolExhausted(_)));

        drop(a);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn waiter_gets_released_resource() {
        let counter = counter();
        let pool = Pool::new(
            TestManager(counter.clone()),
            config(1, 1, 1).with_acquire_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();

        let held = pool.acquire().await.unwrap();
        let contender = pool.clone();
        let waiter = tokio::spawn(async move { *contender.acquire().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhealthy_idle_is_replaced() {
        let counter = counter();
        let pool = Pool::new(TestManager(counter.clone()), config(1, 2, 2))
            .await
            .unwrap();

        counter.healthy.store(false, Ordering::SeqCst);
        let fresh = pool.acquire().await.unwrap();
        assert_eq!(*fresh, 2);
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn excess_idle_is_destroyed() {
        let counter = counter();
        let pool = Pool::new(TestManager(counter.clone()), config(0, 3, 1))
            .await
            .unwrap();
        // Default initial_cap is clamped to max_idle.
        assert_eq!(pool.status().idle, 1);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        drop(a);
        drop(b);
        drop(c);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pool.status().idle, 1);
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let counter = counter();
        let pool = Pool::new(TestManager(counter.clone()), config(2, 2, 2))
            .await
            .unwrap();
        pool.close().await;
        assert!(matches!(pool.acquire().await.err().unwrap(), ClientError::Shutdown));
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 2);
    }
}
