use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{combine, take_u16};
use crate::error::{Result, WireError};
use crate::header::{CsHead, NetHead, CS_HEAD_LEN, NET_HEAD_LEN};

/// Headers plus the 2-byte body length prefix.
pub const FRAME_OVERHEAD: usize = NET_HEAD_LEN + CS_HEAD_LEN + 2;

/// Largest body a frame can carry. `u16::MAX` itself is rejected.
pub const MAX_BODY_LEN: usize = u16::MAX as usize - 1;

/// A decoded request or reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub net: NetHead,
    pub cs: CsHead,
    pub body: Bytes,
}

impl Frame {
    /// Create a frame, checking the body fits the length prefix.
    pub fn new(net: NetHead, cs: CsHead, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        check_body_len(body.len())?;
        Ok(Self { net, cs, body })
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = BytesMut::with_capacity(FRAME_OVERHEAD);
        self.net.encode(&mut head);
        self.cs.encode(&mut head);
        // Length was validated on construction.
        head.put_u16(self.body.len() as u16);
        combine(&[&head[..], &self.body[..]])
    }

    /// The total wire size of this frame (headers + length + body).
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.body.len()
    }

    /// Routing key of the destination service instance.
    pub fn routing_key(&self) -> String {
        self.net.routing_key()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────┬──────────┬──────────────┐
/// │ NetHead      │ CsHead      │ Length   │ Body         │
/// │ (54B)        │ (32B)       │ (2B BE)  │ (Length B)   │
/// └──────────────┴─────────────┴──────────┴──────────────┘
/// ```
///
/// Nothing is written when the body is too large.
pub fn encode_frame(net: &NetHead, cs: &CsHead, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    check_body_len(body.len())?;
    dst.reserve(FRAME_OVERHEAD + body.len());
    put_frame(net, cs, body, dst);
    Ok(())
}

/// Decode a complete frame.
///
/// Bytes after the declared body are ignored.
pub fn decode_frame(src: &[u8]) -> Result<Frame> {
    let (net, rest) = NetHead::decode(src)?;
    let (cs, mut rest) = CsHead::decode(rest)?;
    let body_len = take_u16(&mut rest, "frame.body_len")? as usize;

    if rest.len() < body_len {
        return Err(WireError::Truncated {
            what: "frame.body",
            needed: body_len,
            available: rest.len(),
        });
    }
    if rest.len() > body_len {
        tracing::trace!(
            extra = rest.len() - body_len,
            "ignoring bytes after frame body"
        );
    }

    Ok(Frame {
        net,
        cs,
        body: Bytes::copy_from_slice(&rest[..body_len]),
    })
}

/// Broker routing key for a service instance: `F<service>S<instance>`.
pub fn routing_key(service: u16, instance: u16) -> String {
    format!("F{service}S{instance}")
}

fn check_body_len(len: usize) -> Result<()> {
    if len > MAX_BODY_LEN {
        return Err(WireError::PayloadTooLarge {
            size: len,
            max: MAX_BODY_LEN,
        });
    }
    Ok(())
}

fn put_frame(net: &NetHead, cs: &CsHead, body: &[u8], dst: &mut BytesMut) {
    net.encode(dst);
    cs.encode(dst);
    dst.put_u16(body.len() as u16);
    dst.put_slice(body);
}
