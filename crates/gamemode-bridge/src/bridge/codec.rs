//! Framed codec for server communication.
//!
//! Uses LengthDelimitedCodec for framing + serde_json for serialization.
//! The session keeps the two layers apart: the transport yields raw frames,
//! and [`decode_event`] turns each one into an [`Event`] so a malformed frame
//! can be discarded without tearing down the stream.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::protocol::{Event, OutboundAction};

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),

    #[error("failed to encode action: {0}")]
    Encode(serde_json::Error),
}

/// Length-prefix framing shared by both directions: 4-byte big-endian length.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

pub fn decode_event(frame: &[u8]) -> Result<Event, CodecError> {
    serde_json::from_slice(frame).map_err(CodecError::Malformed)
}

pub fn encode_action(action: &OutboundAction) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(action).map_err(CodecError::Encode)?;
    // Must stay below INFO: the console redirection layer forwards INFO and
    // above, and forwarding an encode log would queue yet another frame.
    tracing::trace!(json_size_bytes = json.len(), "Encoding frame");
    Ok(Bytes::from(json))
}

/// Codec that frames messages with length prefix and serializes with JSON.
///
/// The bridge itself reads raw frames; this is the typed variant for the
/// other end of the channel (server emulators, test harnesses).
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: frame_codec(DEFAULT_MAX_FRAME_LENGTH),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(json), dst)
    }
}
