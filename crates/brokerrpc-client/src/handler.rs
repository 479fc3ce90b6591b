use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use brokerrpc_transport::Delivery;
use futures_util::FutureExt;
use tracing::{error, trace, warn};

/// Error returned by a delivery handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes deliveries that are not replies to an in-flight call.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> DeliveryHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        (self.0)(delivery).await
    }
}

/// Wrap an async closure as a [`DeliveryHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn DeliveryHandler>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Run `handler` on its own task. Failures and panics are logged, never
/// propagated to the read loop.
pub(crate) fn spawn_handler(handler: Arc<dyn DeliveryHandler>, delivery: Delivery) {
    tokio::spawn(async move {
        let delivery_tag = delivery.delivery_tag;
        match AssertUnwindSafe(handler.handle(delivery)).catch_unwind().await {
            Ok(Ok(())) => trace!(delivery_tag, "handler finished"),
            Ok(Err(err)) => warn!(delivery_tag, error = %err, "handler failed"),
            Err(panic) => error!(
                delivery_tag,
                panic = %panic_message(panic.as_ref()),
                "handler panicked"
            ),
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
