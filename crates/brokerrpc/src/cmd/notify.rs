use std::sync::Arc;

use brokerrpc_client::{ChannelPool, PoolConfig, RpcClient, ServiceClient};
use brokerrpc_wire::{CsHead, NetHead};

use crate::cmd::{header_timestamp, resolve_payload, NotifyArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: NotifyArgs, _format: OutputFormat) -> CliResult<i32> {
    let session_config = args.broker.session_config()?;
    let connector = args.broker.connector()?;
    let body = resolve_payload(&args.payload)?;

    let pool = ChannelPool::connect(
        connector,
        args.broker.uri.as_str(),
        session_config,
        PoolConfig::new(1, 2, 1),
    )
    .await
    .map_err(|err| client_error("connect failed", err))?;
    let rpc = Arc::new(RpcClient::producer(pool));

    let net = NetHead {
        src_service: args.src_service,
        src_instance: args.src_instance,
        dst_service: args.dst_service,
        dst_instance: args.dst_instance,
        timestamp: header_timestamp(),
        ..NetHead::default()
    };
    let cs = CsHead {
        message_id: args.message_id,
        timestamp: net.timestamp,
        ..CsHead::default()
    };

    let result = ServiceClient::json(Arc::clone(&rpc))
        .notify_raw(&body, &net, &cs)
        .await;
    rpc.shutdown().await;
    result.map_err(|err| client_error("notify failed", err))?;

    tracing::info!(routing_key = %net.routing_key(), size = body.len(), "notification sent");
    Ok(SUCCESS)
}
