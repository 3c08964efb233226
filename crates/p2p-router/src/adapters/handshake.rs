//! NodeInfo exchange shared by the bundled transports: each side writes its
//! bincode-encoded NodeInfo as the first frame and reads the other's.

use bytes::Bytes;

use crate::domain::errors::TransportError;
use crate::domain::types::NodeInfo;

pub(crate) fn encode_node_info(info: &NodeInfo) -> Result<Bytes, TransportError> {
    bincode::serialize(info)
        .map(Bytes::from)
        .map_err(|e| TransportError::Handshake(format!("encode node info: {}", e)))
}

pub(crate) fn decode_node_info(frame: Option<Bytes>) -> Result<NodeInfo, TransportError> {
    let frame = frame.ok_or_else(|| {
        TransportError::Handshake("connection closed before node info".to_string())
    })?;
    bincode::deserialize(&frame)
        .map_err(|e| TransportError::Handshake(format!("decode node info: {}", e)))
}
