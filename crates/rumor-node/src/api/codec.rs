//! Framing for the module API.

use crate::api::message::{ApiFrame, ApiMessage, HEADER_SIZE};
use crate::error::WireError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Splits the byte stream into [`ApiFrame`]s and encodes [`ApiMessage`]s.
///
/// Decoding only frames; [`ApiMessage::parse`] interprets bodies so a bad
/// body does not break the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiCodec;

impl Decoder for ApiCodec {
    type Item = ApiFrame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ApiFrame>, WireError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let size = u16::from_be_bytes([src[0], src[1]]);
        let frame_len = usize::from(size);
        if frame_len < HEADER_SIZE {
            return Err(WireError::BufferTooSmall(size));
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        frame.advance(2);
        let msg_type = frame.get_u16();
        Ok(Some(ApiFrame {
            msg_type,
            body: frame.freeze(),
        }))
    }
}

impl Encoder<ApiMessage> for ApiCodec {
    type Error = WireError;

    fn encode(&mut self, item: ApiMessage, dst: &mut BytesMut) -> Result<(), WireError> {
        let size = item.frame_size()?;

        dst.reserve(usize::from(size));
        dst.put_u16(size);
        dst.put_u16(item.msg_type());
        item.write_body(dst);
        Ok(())
    }
}
