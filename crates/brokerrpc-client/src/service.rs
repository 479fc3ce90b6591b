//! Framed service calls.
//!
//! [`ServiceClient`] wraps an [`RpcClient`]: it encodes the payload, frames it
//! behind the network and call headers, routes by the destination fields and
//! decodes the reply frame. [`Responder`] is the serving side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use brokerrpc_transport::Delivery;
use brokerrpc_wire::{decode_frame, encode_frame, CsHead, Frame, NetHead};
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::codec::{JsonCodec, PayloadCodec};
use crate::config::ServiceConfig;
use crate::error::{ClientError, Result};
use crate::rpc::RpcClient;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Typed calls to services addressed by [`NetHead`] destination fields.
pub struct ServiceClient<C = JsonCodec> {
    rpc: Arc<RpcClient>,
    codec: C,
    config: ServiceConfig,
    request_id: u64,
}

impl ServiceClient<JsonCodec> {
    /// Client with JSON payloads and the default timeout.
    pub fn json(rpc: Arc<RpcClient>) -> Self {
        Self::new(rpc, JsonCodec)
    }
}

impl<C> ServiceClient<C> {
    pub fn new(rpc: Arc<RpcClient>, codec: C) -> Self {
        Self {
            rpc,
            codec,
            config: ServiceConfig::default(),
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the id carried in this client's log lines.
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Call and decode the reply body.
    pub async fn call<Req, Resp>(&self, request: &Req, net: &NetHead, cs: &CsHead) -> Result<Resp>
    where
        C: PayloadCodec<Req> + PayloadCodec<Resp>,
    {
        let reply = self.call_frame(request, net, cs).await?;
        <C as PayloadCodec<Resp>>::decode(&self.codec, &reply.body).map_err(|err| {
            warn!(request_id = self.request_id, error = %err, "reply body decode failed");
            err
        })
    }

    /// Call and return the decoded reply frame.
    pub async fn call_frame<Req>(&self, request: &Req, net: &NetHead, cs: &CsHead) -> Result<Frame>
    where
        C: PayloadCodec<Req>,
    {
        let body = self.encode_payload(request)?;
        self.call_raw(&body, net, cs).await
    }

    /// Call with an already-encoded body.
    pub async fn call_raw(&self, body: &[u8], net: &NetHead, cs: &CsHead) -> Result<Frame> {
        let started = Instant::now();
        let frame = self.frame(body, net, cs)?;
        let routing_key = net.routing_key();
        info!(
            request_id = self.request_id,
            routing_key = %routing_key,
            bytes = body.len(),
            "service call"
        );

        let reply = self
            .rpc
            .call(frame, &routing_key, self.config.timeout)
            .await
            .map_err(|err| {
                warn!(
                    request_id = self.request_id,
                    routing_key = %routing_key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "service call failed"
                );
                err
            })?;

        let frame = decode_frame(&reply).map_err(|err| {
            warn!(request_id = self.request_id, error = %err, "malformed reply frame");
            ClientError::from(err)
        })?;
        debug!(
            request_id = self.request_id,
            routing_key = %routing_key,
            status_code = frame.cs.status_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "service reply"
        );
        Ok(frame)
    }

    /// Publish a message without waiting for a reply.
    pub async fn notify<Msg>(&self, message: &Msg, net: &NetHead, cs: &CsHead) -> Result<()>
    where
        C: PayloadCodec<Msg>,
    {
        let body = self.encode_payload(message)?;
        self.notify_raw(&body, net, cs).await
    }

    /// Publish an already-encoded body.
    pub async fn notify_raw(&self, body: &[u8], net: &NetHead, cs: &CsHead) -> Result<()> {
        let frame = self.frame(body, net, cs)?;
        let routing_key = net.routing_key();
        info!(
            request_id = self.request_id,
            routing_key = %routing_key,
            bytes = body.len(),
            "service notify"
        );
        self.rpc.notify(frame, &routing_key).await.map_err(|err| {
            warn!(
                request_id = self.request_id,
                routing_key = %routing_key,
                error = %err,
                "service notify failed"
            );
            err
        })
    }

    fn encode_payload<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        C: PayloadCodec<T>,
    {
        self.codec.encode(value).map_err(|err| {
            warn!(request_id = self.request_id, error = %err, "payload encode failed");
            err
        })
    }

    fn frame(&self, body: &[u8], net: &NetHead, cs: &CsHead) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        encode_frame(net, cs, body, &mut buf).map_err(|err| {
            warn!(request_id = self.request_id, bytes = body.len(), error = %err, "body too large");
            ClientError::from(err)
        })?;
        Ok(buf.freeze())
    }
}

/// Answers framed requests received by a consumer handler.
#[derive(Clone)]
pub struct Responder {
    rpc: Arc<RpcClient>,
}

impl Responder {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    /// Decode a request delivery into its frame.
    pub fn decode(&self, delivery: &Delivery) -> Result<Frame> {
        Ok(decode_frame(&delivery.body)?)
    }

    /// Reply to `request` with `body` under `cs`.
    ///
    /// The reply swaps source and destination, carries the delivery's
    /// correlation id and is published on the requester's routing key.
    pub async fn respond(
        &self,
        delivery: &Delivery,
        request: &Frame,
        cs: &CsHead,
        body: &[u8],
    ) -> Result<()> {
        let correlation_id = delivery
            .correlation_id()
            .ok_or(ClientError::MissingCorrelation)?;
        let net = request.net.reply_to();
        let mut buf = BytesMut::new();
        encode_frame(&net, cs, body, &mut buf)?;
        self.rpc
            .reply(correlation_id, &request.net.reply_routing_key(), buf.freeze())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use brokerrpc_transport::MemoryBroker;
    use brokerrpc_wire::MAX_BODY_LEN;
    use tokio::sync::mpsc;

    use super::*;
    use crate::channel_pool::ChannelPool;
    use crate::config::{ConsumerConfig, PoolConfig, SessionConfig};
    use crate::consumer::Consumer;
    use crate::handler::handler_fn;

    async fn producer(broker: &MemoryBroker) -> Arc<RpcClient> {
        let pool = ChannelPool::connect(
            Arc::new(broker.clone()),
            "memory://",
            SessionConfig::default(),
            PoolConfig::new(1, 2, 1),
        )
        .await
        .unwrap();
        Arc::new(RpcClient::producer(pool))
    }

    fn dst(service: u16, instance: u16) -> NetHead {
        NetHead {
            dst_service: service,
            dst_instance: instance,
            ..NetHead::default()
        }
    }

    #[tokio::test]
    async fn request_ids_are_distinct() {
        let broker = MemoryBroker::new();
        let rpc = producer(&broker).await;
        let a = ServiceClient::json(Arc::clone(&rpc));
        let b = ServiceClient::json(Arc::clone(&rpc));
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.with_request_id(9).request_id(), 9);
        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_publish() {
        let broker = MemoryBroker::new();
        let rpc = producer(&broker).await;
        let client = ServiceClient::json(Arc::clone(&rpc));

        let body = vec![0_u8; MAX_BODY_LEN + 1];
        let err = client
            .notify_raw(&body, &dst(3, 1), &CsHead::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Wire(_)));
        assert_eq!(broker.published_count(), 0);
        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn notify_routes_by_destination() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Consumer::connect(
            Arc::new(broker.clone()),
            "memory://",
            SessionConfig::default(),
            ConsumerConfig::new("svc", "F40S2"),
            Some(handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    tx.send(delivery.body)?;
                    Ok(())
                }
            })),
        )
        .await
        .unwrap();
        let rpc = producer(&broker).await;
        let client = ServiceClient::json(Arc::clone(&rpc));

        let cs = CsHead {
            message_id: 77,
            ..CsHead::default()
        };
        client
            .notify(&"hello".to_string(), &dst(40, 2), &cs)
            .await
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame = decode_frame(&body).unwrap();
        assert_eq!(frame.net.dst_service, 40);
        assert_eq!(frame.cs.message_id, 77);
        assert_eq!(&frame.body[..], br#""hello""#);

        rpc.shutdown().await;
        consumer.shutdown().await;
    }

    #[cfg(feature = "prost")]
    #[tokio::test]
    async fn protobuf_bodies_travel_in_frames() {
        use crate::codec::ProstCodec;

        #[derive(Clone, PartialEq, prost::Message)]
        struct Heartbeat {
            #[prost(uint64, tag = "1")]
            session: u64,
        }

        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Consumer::connect(
            Arc::new(broker.clone()),
            "memory://",
            SessionConfig::default(),
            ConsumerConfig::new("svc", "F40S2"),
            Some(handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    tx.send(delivery.body)?;
                    Ok(())
                }
            })),
        )
        .await
        .unwrap();
        let rpc = producer(&broker).await;
        let client = ServiceClient::new(Arc::clone(&rpc), ProstCodec);

        let beat = Heartbeat { session: 9001 };
        client
            .notify(&beat, &dst(40, 2), &CsHead::default())
            .await
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame = decode_frame(&body).unwrap();
        let back: Heartbeat = ProstCodec.decode(&frame.body).unwrap();
        assert_eq!(back, beat);

        rpc.shutdown().await;
        consumer.shutdown().await;
    }
}
