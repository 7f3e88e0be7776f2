//! Request and response framing.
//!
//! ```text
//! Request  => Size ApiKey ApiVersion CorrelationId ClientId Payload
//! Response => Size CorrelationId Payload
//! ```
//!
//! `Size` is an int32 that excludes itself.

use crate::codec::{length_prefix, CodecError, Result, Wire};
use crate::messages::ApiRequest;
use crate::wire_record;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Frames larger than this are treated as stream corruption
pub const MAX_FRAME_SIZE: usize = 100_000_000;

wire_record! {
    pub struct RequestHeader {
        pub api_key: i16,
        pub api_version: i16,
        pub correlation_id: i32,
        pub client_id: String,
    }
}

/// Encode a complete size-prefixed request frame
pub fn encode_request<R: ApiRequest>(
    request: &R,
    correlation_id: i32,
    client_id: &str,
) -> Result<Bytes> {
    let header = RequestHeader {
        api_key: R::API_KEY,
        api_version: R::API_VERSION,
        correlation_id,
        client_id: client_id.to_string(),
    };

    let mut buf = BytesMut::new();
    // Size placeholder, patched once the body is written
    buf.put_i32(0);
    header.encode(&mut buf)?;
    request.encode(&mut buf)?;

    let size = length_prefix::<i32>("frame", buf.len() - 4, i32::MAX as usize)?;
    buf[0..4].copy_from_slice(&size.to_be_bytes());
    Ok(buf.freeze())
}

/// Encode a complete size-prefixed response frame
pub fn encode_response<T: Wire>(correlation_id: i32, response: &T) -> Result<Bytes> {
    let mut body = BytesMut::new();
    correlation_id.encode(&mut body)?;
    response.encode(&mut body)?;

    let mut buf = BytesMut::with_capacity(body.len() + 4);
    buf.put_i32(length_prefix::<i32>("frame", body.len(), i32::MAX as usize)?);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// A request frame with its length prefix already stripped
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub header: RequestHeader,
    pub body: Bytes,
}

impl RequestFrame {
    pub fn parse(frame: Bytes) -> Result<Self> {
        let mut cursor = Cursor::new(frame.as_ref());
        let header = RequestHeader::decode(&mut cursor)?;
        let consumed = cursor.position() as usize;
        Ok(RequestFrame {
            header,
            body: frame.slice(consumed..),
        })
    }

    pub fn decode_body<R: ApiRequest>(&self) -> Result<R> {
        if self.header.api_key != R::API_KEY {
            return Err(CodecError::InvalidFormat(format!(
                "expected api key {}, found {}",
                R::API_KEY,
                self.header.api_key
            )));
        }
        R::from_bytes(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub correlation_id: i32,
    pub payload: Bytes,
}

impl ResponseFrame {
    pub fn decode_payload<T: Wire>(&self) -> Result<T> {
        T::from_bytes(&self.payload)
    }
}

/// Splits a byte stream into response frames.
///
/// A declared zero-length frame is skipped. A frame too short to hold a
/// correlation id is logged and dropped. Oversized frames are an error since
/// the stream can no longer be trusted.
#[derive(Debug, Default)]
pub struct ResponseFrameCodec;

impl Decoder for ResponseFrameCodec {
    type Item = ResponseFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }

            // Peek at the size without consuming it
            let size = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
            if size < 0 || size as usize > MAX_FRAME_SIZE {
                return Err(CodecError::InvalidFormat(format!(
                    "invalid frame length: {size}"
                )));
            }
            let size = size as usize;

            if size == 0 {
                src.advance(4);
                continue;
            }

            if src.len() < 4 + size {
                src.reserve(4 + size - src.len());
                return Ok(None);
            }

            if size < 4 {
                warn!(size, "Dropping malformed response frame");
                src.advance(4 + size);
                continue;
            }

            src.advance(4);
            let correlation_id = src.get_i32();
            let payload = src.split_to(size - 4).freeze();
            return Ok(Some(ResponseFrame {
                correlation_id,
                payload,
            }));
        }
    }
}
