//! Big-endian integer helpers shared by the header and frame codecs.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Read a big-endian `u16` from the front of `src`, advancing it.
pub fn take_u16(src: &mut &[u8], what: &'static str) -> Result<u16> {
    ensure(src, 2, what)?;
    Ok(src.get_u16())
}

/// Read a big-endian `u32` from the front of `src`, advancing it.
pub fn take_u32(src: &mut &[u8], what: &'static str) -> Result<u32> {
    ensure(src, 4, what)?;
    Ok(src.get_u32())
}

/// Skip `len` reserved bytes at the front of `src`.
pub fn skip(src: &mut &[u8], len: usize, what: &'static str) -> Result<()> {
    ensure(src, len, what)?;
    src.advance(len);
    Ok(())
}

/// Concatenate buffers with a single allocation and one copy per part.
pub fn combine(parts: &[&[u8]]) -> Bytes {
    let total = parts.iter().map(|part| part.len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for part in parts {
        out.extend_from_slice(part);
    }
    out.freeze()
}

fn ensure(src: &[u8], needed: usize, what: &'static str) -> Result<()> {
    if src.len() < needed {
        return Err(WireError::Truncated {
            what,
            needed,
            available: src.len(),
        });
    }
    Ok(())
}
