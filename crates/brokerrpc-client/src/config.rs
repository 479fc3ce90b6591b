use std::time::Duration;

use brokerrpc_transport::DEFAULT_EXCHANGE;

/// Fixed delay between reconnect and resubscribe attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Channels opened when the pool is created.
pub const DEFAULT_INITIAL_CAP: usize = 8;
/// Idle channels kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 8;
/// Channels that may exist at once.
pub const DEFAULT_MAX_CAP: usize = 32;
/// How long `acquire` waits for a free slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);
/// Deadline for a service call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection session behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay between failed redial attempts.
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl SessionConfig {
    /// Override the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Channel pool bounds. Zero means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Channels opened eagerly at pool creation.
    pub initial_cap: usize,
    /// Idle channels retained after release.
    pub max_idle: usize,
    /// Channels that may exist concurrently.
    pub max_cap: usize,
    /// Wait bound for a free slot when the pool is at capacity.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_cap: DEFAULT_INITIAL_CAP,
            max_idle: DEFAULT_MAX_IDLE,
            max_cap: DEFAULT_MAX_CAP,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Bounds in (initial, max capacity, max idle) order; zeros take defaults.
    pub fn new(initial_cap: usize, max_cap: usize, max_idle: usize) -> Self {
        Self {
            initial_cap,
            max_idle,
            max_cap,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Override the acquire wait bound.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Apply defaults for unset fields; `initial_cap <= max_idle <= max_cap`.
    pub fn resolved(&self) -> Self {
        let or_default = |value: usize, default: usize| if value == 0 { default } else { value };
        let max_cap = or_default(self.max_cap, DEFAULT_MAX_CAP);
        let max_idle = or_default(self.max_idle, DEFAULT_MAX_IDLE).min(max_cap);
        Self {
            initial_cap: or_default(self.initial_cap, DEFAULT_INITIAL_CAP).min(max_idle),
            max_idle,
            max_cap,
            acquire_timeout: if self.acquire_timeout.is_zero() {
                DEFAULT_ACQUIRE_TIMEOUT
            } else {
                self.acquire_timeout
            },
        }
    }
}

/// Inbound queue subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable queue to consume.
    pub queue: String,
    /// Routing key the queue is bound to.
    pub routing_key: String,
    /// Exchange the binding is made on.
    pub exchange: String,
    /// Consumer tag; `consumer<queue>` when unset.
    pub consumer_tag: Option<String>,
}

impl ConsumerConfig {
    /// Subscription of `queue` bound to `routing_key` on the direct exchange.
    pub fn new(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            consumer_tag: None,
        }
    }

    /// Override the exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Override the consumer tag.
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    /// Effective consumer tag.
    pub fn consumer_tag(&self) -> String {
        self.consumer_tag
            .clone()
            .unwrap_or_else(|| format!("consumer{}", self.queue))
    }
}

/// Service call behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Deadline for each call.
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pool_bounds_take_defaults() {
        let config = PoolConfig::new(0, 0, 0).resolved();
        assert_eq!(config.initial_cap, 8);
        assert_eq!(config.max_idle, 8);
        assert_eq!(config.max_cap, 32);
        assert_eq!(config.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
    }

    #[test]
    fn pool_bounds_clamp_to_max_cap() {
        let config = PoolConfig::new(0, 2, 0).resolved();
        assert_eq!(config.max_cap, 2);
        assert_eq!(config.initial_cap, 2);
        assert_eq!(config.max_idle, 2);
    }

    #[test]
    fn initial_cap_never_exceeds_max_idle() {
        let config = PoolConfig::new(6, 10, 4).resolved();
        assert_eq!(config.initial_cap, 4);
        assert_eq!(config.max_idle, 4);
    }

    #[test]
    fn explicit_pool_bounds_are_kept() {
        let config = PoolConfig::new(1, 4, 3)
            .with_acquire_timeout(Duration::from_millis(50))
            .resolved();
        assert_eq!(
            config,
            PoolConfig {
                initial_cap: 1,
                max_idle: 3,
                max_cap: 4,
                acquire_timeout: Duration::from_millis(50),
            }
        );
    }

    #[test]
    fn consumer_tag_defaults_to_queue_name() {
        let config = ConsumerConfig::new("rpc.reply", "F9S1");
        assert_eq!(config.exchange, "amq.direct");
        assert_eq!(config.consumer_tag(), "consumerrpc.reply");
        assert_eq!(config.with_consumer_tag("tag").consumer_tag(), "tag");
    }
}
