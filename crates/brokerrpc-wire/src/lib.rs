//! Fixed-layout binary framing for broker-carried service calls.
//!
//! Every request and reply travelling over the broker is one frame:
//! - A 54-byte network header ([`NetHead`]) carrying routing and session fields
//! - A 32-byte call header ([`CsHead`]) carrying the caller's view of the call
//! - A 2-byte big-endian body length
//! - The body itself (at most 65534 bytes)
//!
//! All integers are big-endian. The layout is a compatibility contract with
//! peer services and never grows optional or variable-length fields.

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;

pub use codec::{combine, take_u16, take_u32};
pub use error::{Result, WireError};
pub use frame::{decode_frame, encode_frame, routing_key, Frame, FRAME_OVERHEAD, MAX_BODY_LEN};
pub use header::{CsHead, NetHead, CS_HEAD_LEN, NET_HEAD_LEN};
