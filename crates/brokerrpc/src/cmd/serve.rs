use std::sync::Arc;

use brokerrpc_client::{
    handler_fn, ChannelPool, Consumer, ConsumerConfig, DeliveryHandler, PoolConfig, Responder,
    RpcClient,
};
use brokerrpc_transport::Delivery;
use brokerrpc_wire::routing_key;
use tokio::sync::mpsc;

use crate::cmd::ServeArgs;
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let session_config = args.broker.session_config()?;
    let connector = args.broker.connector()?;
    let key = routing_key(args.service, args.instance);
    let queue = args
        .queue
        .clone()
        .unwrap_or_else(|| format!("brokerrpc.svc.{key}"));

    let pool = ChannelPool::connect(
        Arc::clone(&connector),
        args.broker.uri.as_str(),
        session_config.clone(),
        PoolConfig::default(),
    )
    .await
    .map_err(|err| client_error("connect failed", err))?;
    let rpc = Arc::new(RpcClient::producer(pool));

    let (served_tx, mut served_rx) = mpsc::unbounded_channel();
    let consumer = match Consumer::connect(
        connector,
        args.broker.uri.as_str(),
        session_config,
        ConsumerConfig::new(queue.clone(), key.clone()),
        Some(echo_handler(Responder::new(Arc::clone(&rpc)), served_tx)),
    )
    .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            rpc.shutdown().await;
            return Err(client_error("subscribe failed", err));
        }
    };
    tracing::info!(queue = %queue, routing_key = %key, "echo service ready");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut served = 0usize;
    let outcome = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                break signal.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                });
            }
            next = served_rx.recv() => {
                if next.is_none() {
                    break Ok(());
                }
                served = served.saturating_add(1);
                if args.count.is_some_and(|count| served >= count) {
                    break Ok(());
                }
            }
        }
    };

    consumer.shutdown().await;
    rpc.shutdown().await;
    outcome.map(|()| SUCCESS)
}

/// Answers each framed request with its own body, headers swapped.
fn echo_handler(
    responder: Responder,
    served: mpsc::UnboundedSender<()>,
) -> Arc<dyn DeliveryHandler> {
    handler_fn(move |delivery: Delivery| {
        let responder = responder.clone();
        let served = served.clone();
        async move {
            let request = responder.decode(&delivery)?;
            tracing::info!(
                correlation_id = delivery.correlation_id().unwrap_or(""),
                src = %request.net.reply_routing_key(),
                size = request.body.len(),
                "echoing frame"
            );
            if delivery.correlation_id().is_some() {
                responder
                    .respond(&delivery, &request, &request.cs, &request.body)
                    .await?;
            }
            let _ = served.send(());
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use brokerrpc_client::{ServiceClient, ServiceConfig, SessionConfig};
    use brokerrpc_transport::MemoryBroker;
    use brokerrpc_wire::{CsHead, NetHead};

    use super::*;

    #[tokio::test]
    async fn echo_handler_answers_calls() {
        let broker = MemoryBroker::new();
        let config = SessionConfig::default();
        let server = Arc::new(RpcClient::producer(
            ChannelPool::connect(
                Arc::new(broker.clone()),
                "memory://",
                config.clone(),
                PoolConfig::new(1, 2, 1),
            )
            .await
            .unwrap(),
        ));
        let (served_tx, mut served_rx) = mpsc::unbounded_channel();
        let service = Consumer::connect(
            Arc::new(broker.clone()),
            "memory://",
            config.clone(),
            ConsumerConfig::new("svc", "F40S2"),
            Some(echo_handler(Responder::new(Arc::clone(&server)), served_tx)),
        )
        .await
        .unwrap();

        let replies = Consumer::connect(
            Arc::new(broker.clone()),
            "memory://",
            config.clone(),
            ConsumerConfig::new("replies", "F9S1"),
            None,
        )
        .await
        .unwrap();
        let caller = Arc::new(RpcClient::new(
            ChannelPool::connect(
                Arc::new(broker.clone()),
                "memory://",
                config,
                PoolConfig::new(1, 2, 1),
            )
            .await
            .unwrap(),
            replies,
        ));

        let net = NetHead {
            src_service: 9,
            src_instance: 1,
            dst_service: 40,
            dst_instance: 2,
            ..NetHead::default()
        };
        let reply = ServiceClient::json(Arc::clone(&caller))
            .with_config(ServiceConfig {
                timeout: Duration::from_secs(2),
            })
            .call_raw(b"ping", &net, &CsHead::default())
            .await
            .unwrap();
        assert_eq!(&reply.body[..], b"ping");
        assert_eq!(reply.net.dst_service, 9);
        assert!(served_rx.recv().await.is_some());

        caller.shutdown().await;
        service.shutdown().await;
        server.shutdown().await;
    }
}
