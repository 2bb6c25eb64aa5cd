use crate::Packet;
use thiserror::Error;

/// Encoding a connection speaks. Browsers send text frames, native clients binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Binary,
}

/// An encoded packet, ready to be wrapped in a transport frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed json frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed binary frame: {0}")]
    Binary(#[from] bincode::Error),
}

pub fn encode(packet: &Packet, format: WireFormat) -> Result<Frame, CodecError> {
    match format {
        WireFormat::Json => Ok(Frame::Text(serde_json::to_string(packet)?)),
        WireFormat::Binary => Ok(Frame::Binary(bincode::serialize(packet)?)),
    }
}

pub fn decode_text(text: &str) -> Result<Packet, CodecError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_binary(bytes: &[u8]) -> Result<Packet, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}
