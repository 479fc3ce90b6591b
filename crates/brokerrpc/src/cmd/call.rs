use std::sync::Arc;

use brokerrpc_client::{
    ChannelPool, Consumer, ConsumerConfig, PoolConfig, RpcClient, ServiceClient, ServiceConfig,
};
use brokerrpc_wire::{routing_key, CsHead, NetHead};

use crate::cmd::{header_timestamp, parse_duration, resolve_payload, CallArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let session_config = args.broker.session_config()?;
    let connector = args.broker.connector()?;
    let body = resolve_payload(&args.payload)?;

    let reply_key = routing_key(args.reply_service, args.reply_instance);
    let reply_queue = args
        .reply_queue
        .clone()
        .unwrap_or_else(|| format!("brokerrpc.reply.{reply_key}"));

    let pool = ChannelPool::connect(
        Arc::clone(&connector),
        args.broker.uri.as_str(),
        session_config.clone(),
        PoolConfig::new(1, 4, 1),
    )
    .await
    .map_err(|err| client_error("connect failed", err))?;

    let replies = match Consumer::connect(
        connector,
        args.broker.uri.as_str(),
        session_config,
        ConsumerConfig::new(reply_queue, reply_key.clone()),
        None,
    )
    .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            pool.shutdown().await;
            return Err(client_error("reply subscribe failed", err));
        }
    };

    let rpc = Arc::new(RpcClient::new(pool, replies));
    let client = ServiceClient::json(Arc::clone(&rpc)).with_config(ServiceConfig { timeout });
    let net = NetHead {
        src_service: args.reply_service,
        src_instance: args.reply_instance,
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

    let result = client.call_raw(&body, &net, &cs).await;
    rpc.shutdown().await;

    let reply = result.map_err(|err| client_error("call failed", err))?;
    print_frame(&reply, &reply_key, None, format);
    Ok(SUCCESS)
}
