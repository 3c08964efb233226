//! Wire frame: `[channel id: u16 big-endian][payload]`.
//!
//! Frame boundaries come from the Transport; this layer only tags payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::errors::ProtocolViolation;
use super::types::ChannelId;

/// Length of the channel tag.
pub const TAG_LEN: usize = 2;

/// Prefix `payload` with its channel tag.
pub fn encode_frame(channel_id: ChannelId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TAG_LEN + payload.len());
    buf.put_u16(channel_id.0);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a frame into channel tag and payload without copying.
pub fn decode_frame(mut frame: Bytes) -> Result<(ChannelId, Bytes), ProtocolViolation> {
    if frame.len() < TAG_LEN {
        return Err(ProtocolViolation::MalformedFrame { len: frame.len() });
    }
    let channel_id = ChannelId(frame.get_u16());
    Ok((channel_id, frame))
}
