use bytes::BufMut;

use crate::codec::{skip, take_u16, take_u32};
use crate::error::Result;
use crate::frame::routing_key;

/// Encoded size of [`NetHead`].
pub const NET_HEAD_LEN: usize = 54;

/// Encoded size of [`CsHead`], including the reserved tail.
pub const CS_HEAD_LEN: usize = 32;

/// Reserved zero bytes at the end of [`CsHead`].
const CS_HEAD_RESERVED: usize = 6;

/// Network header: routing between services plus the originating session.
///
/// Wire format (all big-endian):
/// ```text
/// ver(2) src_service(2) src_instance(2) dst_service(2) dst_instance(2)
/// socket_fd(4) src_ip(4) src_port(2) principal_id(4) message_id(4)
/// message_type(2) message_seq(4) message_bits(4) timestamp(4)
/// session_id(4) status_code(4) flags(4)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NetHead {
    pub version: u16,
    pub src_service: u16,
    pub src_instance: u16,
    pub dst_service: u16,
    pub dst_instance: u16,
    pub socket_fd: u32,
    pub src_ip: u32,
    pub src_port: u16,
    pub principal_id: u32,
    pub message_id: u32,
    pub message_type: u16,
    pub message_seq: u32,
    pub message_bits: u32,
    pub timestamp: u32,
    pub session_id: u32,
    pub status_code: u32,
    pub flags: u32,
}

impl NetHead {
    /// Append the 54-byte encoding to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.version);
        dst.put_u16(self.src_service);
        dst.put_u16(self.src_instance);
        dst.put_u16(self.dst_service);
        dst.put_u16(self.dst_instance);
        dst.put_u32(self.socket_fd);
        dst.put_u32(self.src_ip);
        dst.put_u16(self.src_port);
        dst.put_u32(self.principal_id);
        dst.put_u32(self.message_id);
        dst.put_u16(self.message_type);
        dst.put_u32(self.message_seq);
        dst.put_u32(self.message_bits);
        dst.put_u32(self.timestamp);
        dst.put_u32(self.session_id);
        dst.put_u32(self.status_code);
        dst.put_u32(self.flags);
    }

    /// Decode a header from the front of `src`, returning the remaining bytes.
    pub fn decode(src: &[u8]) -> Result<(Self, &[u8])> {
        let mut buf = src;
        let head = Self {
            version: take_u16(&mut buf, "net_head.version")?,
            src_service: take_u16(&mut buf, "net_head.src_service")?,
            src_instance: take_u16(&mut buf, "net_head.src_instance")?,
            dst_service: take_u16(&mut buf, "net_head.dst_service")?,
            dst_instance: take_u16(&mut buf, "net_head.dst_instance")?,
            socket_fd: take_u32(&mut buf, "net_head.socket_fd")?,
            src_ip: take_u32(&mut buf, "net_head.src_ip")?,
            src_port: take_u16(&mut buf, "net_head.src_port")?,
            principal_id: take_u32(&mut buf, "net_head.principal_id")?,
            message_id: take_u32(&mut buf, "net_head.message_id")?,
            message_type: take_u16(&mut buf, "net_head.message_type")?,
            message_seq: take_u32(&mut buf, "net_head.message_seq")?,
            message_bits: take_u32(&mut buf, "net_head.message_bits")?,
            timestamp: take_u32(&mut buf, "net_head.timestamp")?,
            session_id: take_u32(&mut buf, "net_head.session_id")?,
            status_code: take_u32(&mut buf, "net_head.status_code")?,
            flags: take_u32(&mut buf, "net_head.flags")?,
        };
        Ok((head, buf))
    }

    /// Routing key of the destination service instance (`F<fe>S<id>`).
    pub fn routing_key(&self) -> String {
        routing_key(self.dst_service, self.dst_instance)
    }

    /// Routing key a reply to this header should be published on.
    pub fn reply_routing_key(&self) -> String {
        routing_key(self.src_service, self.src_instance)
    }

    /// Header for the reply: source and destination swapped, rest kept.
    pub fn reply_to(&self) -> Self {
        Self {
            src_service: self.dst_service,
            src_instance: self.dst_instance,
            dst_service: self.src_service,
            dst_instance: self.src_instance,
            ..*self
        }
    }
}

/// Call header: the client/server view of a single call.
///
/// Wire format (all big-endian):
/// ```text
/// ver(2) principal_id(4) message_id(4) message_seq(4) timestamp(4)
/// session_id(4) status_code(4) reserved(6, zero)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CsHead {
    pub version: u16,
    pub principal_id: u32,
    pub message_id: u32,
    pub message_seq: u32,
    pub timestamp: u32,
    pub session_id: u32,
    pub status_code: u32,
}

impl CsHead {
    /// Append the 32-byte encoding to `dst`, reserved tail zeroed.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.version);
        dst.put_u32(self.principal_id);
        dst.put_u32(self.message_id);
        dst.put_u32(self.message_seq);
        dst.put_u32(self.timestamp);
        dst.put_u32(self.session_id);
        dst.put_u32(self.status_code);
        dst.put_bytes(0, CS_HEAD_RESERVED);
    }

    /// Decode a header from the front of `src`, returning the remaining bytes.
    ///
    /// The reserved tail must be present but its content is ignored.
    pub fn decode(src: &[u8]) -> Result<(Self, &[u8])> {
        let mut buf = src;
        let head = Self {
            version: take_u16(&mut buf, "cs_head.version")?,
            principal_id: take_u32(&mut buf, "cs_head.principal_id")?,
            message_id: take_u32(&mut buf, "cs_head.message_id")?,
            message_seq: take_u32(&mut buf, "cs_head.message_seq")?,
            timestamp: take_u32(&mut buf, "cs_head.timestamp")?,
            session_id: take_u32(&mut buf, "cs_head.session_id")?,
            status_code: take_u32(&mut buf, "cs_head.status_code")?,
        };
        skip(&mut buf, CS_HEAD_RESERVED, "cs_head.reserved")?;
        Ok((head, buf))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::error::WireError;

    fn sample_net_head() -> NetHead {
        NetHead {
            version: 3,
            src_service: 12,
            src_instance: 7,
            dst_service: 40,
            dst_instance: 2,
            socket_fd: 0x0102_0304,
            src_ip: 0xC0A8_0001,
            src_port: 8443,
            principal_id: 100_200,
            message_id: 0x0001_0010,
            message_type: 2,
            message_seq: 99,
            message_bits: 0xF0F0_0F0F,
            timestamp: 1_700_000_000,
            session_id: 77,
            status_code: 0,
            flags: 8,
        }
    }

    fn sample_cs_head() -> CsHead {
        CsHead {
            version: 1,
            principal_id: 100_200,
            message_id: 0x0001_0010,
            message_seq: 99,
            timestamp: 1_700_000_000,
            session_id: 77,
            status_code: 404,
        }
    }

    #[test]
    fn net_head_roundtrip() {
        let head = sample_net_head();
        let mut buf = BytesMut::new();
        head.encode(&mut buf);
        assert_eq!(buf.len(), NET_HEAD_LEN);

        let (decoded, rest) = NetHead::decode(&buf).unwrap();
        assert_eq!(decoded, head);
        assert!(rest.is_empty());
    }

    #[test]
    fn cs_head_roundtrip() {
        let head = sample_cs_head();
        let mut buf = BytesMut::new();
        head.encode(&mut buf);
        assert_eq!(buf.len(), CS_HEAD_LEN);
        assert_eq!(&buf[26..], &[0u8; 6]);

        let (decoded, rest) = CsHead::decode(&buf).unwrap();
        assert_eq!(decoded, head);
        assert!(rest.is_empty());
    }

    #[test]
    fn net_head_field_order_is_fixed() {
        let head = NetHead {
            version: 0x0102,
            dst_service: 0xAABB,
            flags: 0xCAFE_BABE,
            ..NetHead::default()
        };
        let mut buf = BytesMut::new();
        head.encode(&mut buf);

        assert_eq!(&buf[0..2], &[0x01, 0x02]);
        assert_eq!(&buf[6..8], &[0xAA, 0xBB]);
        assert_eq!(&buf[50..54], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    #[test]
    fn decode_returns_trailing_bytes() {
        let mut buf = BytesMut::new();
        sample_net_head().encode(&mut buf);
        buf.extend_from_slice(b"tail");

        let (_, rest) = NetHead::decode(&buf).unwrap();
        assert_eq!(rest, b"tail");
    }

    #[test]
    fn truncated_net_head_is_malformed() {
        let mut buf = BytesMut::new();
        sample_net_head().encode(&mut buf);
        buf.truncate(NET_HEAD_LEN - 1);

        let err = NetHead::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            WireError::Truncated {
                what: "net_head.flags",
                ..
            }
        ));
    }

    #[test]
    fn cs_head_requires_reserved_tail() {
        let mut buf = BytesMut::new();
        sample_cs_head().encode(&mut buf);
        buf.truncate(CS_HEAD_LEN - 2);

        let err = CsHead::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            WireError::Truncated {
                what: "cs_head.reserved",
                ..
            }
        ));
    }

    #[test]
    fn cs_head_ignores_reserved_content() {
        let mut buf = BytesMut::new();
        sample_cs_head().encode(&mut buf);
        buf[31] = 0xFF;

        let (decoded, _) = CsHead::decode(&buf).unwrap();
        assert_eq!(decoded, sample_cs_head());
    }

    #[test]
    fn routing_keys_follow_service_instance_format() {
        let head = sample_net_head();
        assert_eq!(head.routing_key(), "F40S2");
        assert_eq!(head.reply_routing_key(), "F12S7");
    }

    #[test]
    fn reply_to_swaps_endpoints_only() {
        let head = sample_net_head();
        let reply = head.reply_to();

        assert_eq!(reply.src_service, 40);
        assert_eq!(reply.src_instance, 2);
        assert_eq!(reply.dst_service, 12);
        assert_eq!(reply.dst_instance, 7);
        assert_eq!(reply.message_id, head.message_id);
        assert_eq!(reply.routing_key(), head.reply_routing_key());
    }
}
