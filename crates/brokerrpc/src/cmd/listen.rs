use brokerrpc_client::{handler_fn, Consumer, ConsumerConfig};
use brokerrpc_transport::Delivery;
use tokio::sync::mpsc;

use crate::cmd::ListenArgs;
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_delivery, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let session_config = args.broker.session_config()?;
    let connector = args.broker.connector()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let handler = handler_fn(move |delivery: Delivery| {
        let tx = tx.clone();
        async move {
            tx.send(delivery)?;
            Ok(())
        }
    });

    let consumer = Consumer::connect(
        connector,
        args.broker.uri.as_str(),
        session_config,
        ConsumerConfig::new(args.queue.clone(), args.routing_key.clone()),
        Some(handler),
    )
    .await
    .map_err(|err| client_error("subscribe failed", err))?;
    tracing::info!(queue = %args.queue, routing_key = %args.routing_key, "listening");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0usize;
    let outcome = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                break signal.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                });
            }
            next = rx.recv() => {
                let Some(delivery) = next else {
                    break Ok(());
                };
                print_delivery(&delivery, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(());
                }
            }
        }
    };

    consumer.shutdown().await;
    outcome.map(|()| SUCCESS)
}
