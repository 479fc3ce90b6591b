//! In-process echo service: one worker answers framed calls, one caller
//! sends a few requests through the in-memory broker.
//!
//! Run with:
//!   cargo run --example memory-echo
//!
//! Against a real broker use the CLI instead:
//!   cargo run --features cli -- serve --service 40 --instance 2
//!   cargo run --features cli -- call 40 2 --reply-service 9 --json '{"hello":"world"}'

use std::sync::Arc;
use std::time::Duration;

use brokerrpc::client::{
    handler_fn, ChannelPool, Consumer, ConsumerConfig, PoolConfig, Responder, RpcClient,
    ServiceClient, SessionConfig,
};
use brokerrpc::transport::{Delivery, MemoryBroker};
use brokerrpc::wire::{CsHead, NetHead};

const URI: &str = "memory://";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let broker = MemoryBroker::new();

    // Worker side: answers on F40S2.
    let server = Arc::new(RpcClient::producer(
        ChannelPool::connect(
            Arc::new(broker.clone()),
            URI,
            SessionConfig::default(),
            PoolConfig::default(),
        )
        .await?,
    ));
    let responder = Responder::new(Arc::clone(&server));
    let worker = Consumer::connect(
        Arc::new(broker.clone()),
        URI,
        SessionConfig::default(),
        ConsumerConfig::new("echo.F40S2", "F40S2"),
        Some(handler_fn(move |delivery: Delivery| {
            let responder = responder.clone();
            async move {
                let request = responder.decode(&delivery)?;
                eprintln!(
                    "worker received {} bytes from F{}S{}",
                    request.body.len(),
                    request.net.src_service,
                    request.net.src_instance
                );
                let cs = CsHead {
                    status_code: 200,
                    ..request.cs
                };
                responder
                    .respond(&delivery, &request, &cs, &request.body)
                    .await?;
                Ok(())
            }
        })),
    )
    .await?;

    // Caller side: replies arrive on F9S1.
    let replies = Consumer::connect(
        Arc::new(broker.clone()),
        URI,
        SessionConfig::default(),
        ConsumerConfig::new("echo.replies.F9S1", "F9S1"),
        None,
    )
    .await?;
    let caller = Arc::new(RpcClient::new(
        ChannelPool::connect(
            Arc::new(broker.clone()),
            URI,
            SessionConfig::default(),
            PoolConfig::default(),
        )
        .await?,
        replies,
    ));
    let client = ServiceClient::json(Arc::clone(&caller));

    let net = NetHead {
        src_service: 9,
        src_instance: 1,
        dst_service: 40,
        dst_instance: 2,
        ..NetHead::default()
    };
    for seq in 1..=3_u32 {
        let cs = CsHead {
            message_id: seq,
            ..CsHead::default()
        };
        let reply: serde_json::Value = client
            .call(&serde_json::json!({ "seq": seq, "hello": "world" }), &net, &cs)
            .await?;
        eprintln!("caller got {reply}");
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    caller.shutdown().await;
    worker.shutdown().await;
    server.shutdown().await;
    Ok(())
}
