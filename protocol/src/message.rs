//! Legacy message format (magic 0 and 1) and message sets.
//!
//! ```text
//! MessageSet => [Offset MessageSize Message]
//!   Offset => int64
//!   MessageSize => int32
//!   Message => Crc MagicByte Attributes [Timestamp] Key Value
//! ```
//!
//! The CRC covers everything after the CRC field itself.

use crate::codec::{ensure_remaining, length_prefix, CodecError, Result, Wire};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use tracing::trace;

/// Compression codec, stored in the low three bits of the attributes byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
}

impl Compression {
    const MASK: i8 = 0x07;

    pub fn from_attributes(attributes: i8) -> Self {
        match attributes & Self::MASK {
            1 => Compression::Gzip,
            2 => Compression::Snappy,
            3 => Compression::Lz4,
            _ => Compression::None,
        }
    }

    pub fn as_attributes(self) -> i8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Snappy => 2,
            Compression::Lz4 => 3,
        }
    }
}

/// CRC32 (IEEE) of `data`
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub crc: u32,
    pub magic: i8,
    pub attributes: i8,
    /// Present only for magic 1
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Message {
    /// Build a magic 0 message with its checksum filled in
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        let mut message = Message {
            crc: 0,
            magic: 0,
            attributes: Compression::None.as_attributes(),
            timestamp: None,
            key,
            value,
        };
        // A message too large to encode keeps a zero checksum; encoding it fails later
        message.crc = message.compute_crc().unwrap_or_default();
        message
    }

    pub fn compression(&self) -> Compression {
        Compression::from_attributes(self.attributes)
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<()> {
        self.magic.encode(buf)?;
        self.attributes.encode(buf)?;
        if self.magic >= 1 {
            self.timestamp.unwrap_or(-1).encode(buf)?;
        }
        self.key.encode(buf)?;
        self.value.encode(buf)
    }

    /// Checksum over magic, attributes, timestamp, key and value
    pub fn compute_crc(&self) -> Result<u32> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        Ok(checksum(&body))
    }

    /// Whether the stored checksum matches the message contents
    pub fn crc_matches(&self) -> bool {
        self.compute_crc().is_ok_and(|crc| crc == self.crc)
    }
}

impl Wire for Message {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        buf.put_u32(checksum(&body));
        buf.put_slice(&body);
        Ok(())
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let crc = u32::decode(cursor)?;
        let magic = i8::decode(cursor)?;
        let attributes = i8::decode(cursor)?;
        let timestamp = match magic {
            0 => None,
            1 => Some(i64::decode(cursor)?),
            other => {
                return Err(CodecError::InvalidFormat(format!(
                    "unsupported message magic byte {other}"
                )))
            }
        };
        Ok(Message {
            crc,
            magic,
            attributes,
            timestamp,
            key: Option::<Bytes>::decode(cursor)?,
            value: Option::<Bytes>::decode(cursor)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageSetEntry {
    pub offset: i64,
    pub message: Message,
}

/// A size-prefixed sequence of offset-tagged messages.
///
/// Brokers cut fetch responses at `max_bytes`, so the final entry may be
/// truncated. Such a partial entry is dropped on decode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageSet {
    pub entries: Vec<MessageSetEntry>,
}

impl MessageSet {
    /// A message set with offsets 0..n, as sent by producers
    pub fn from_messages<I: IntoIterator<Item = Message>>(messages: I) -> Self {
        MessageSet {
            entries: messages
                .into_iter()
                .enumerate()
                .map(|(i, message)| MessageSetEntry {
                    offset: i as i64,
                    message,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the final complete entry
    pub fn last_offset(&self) -> Option<i64> {
        self.entries.last().map(|entry| entry.offset)
    }
}

impl Wire for MessageSet {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        for entry in &self.entries {
            let message = entry.message.to_bytes()?;
            body.put_i64(entry.offset);
            body.put_i32(length_prefix::<i32>("message", message.len(), i32::MAX as usize)?);
            body.put_slice(&message);
        }
        buf.put_i32(length_prefix::<i32>("message set", body.len(), i32::MAX as usize)?);
        buf.put_slice(&body);
        Ok(())
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let size = i32::decode(cursor)?.max(0) as usize;
        ensure_remaining(cursor, size)?;
        let start = cursor.position() as usize;
        let whole: &[u8] = *cursor.get_ref();
        let data = &whole[start..start + size];
        cursor.advance(size);

        let mut entries = Vec::new();
        let mut inner = Cursor::new(data);
        while inner.remaining() >= 12 {
            let offset = inner.get_i64();
            let message_size = inner.get_i32();
            if message_size < 0 || inner.remaining() < message_size as usize {
                trace!(offset, message_size, "Dropping truncated trailing message");
                break;
            }
            let end = inner.position() as usize + message_size as usize;
            let mut message_cursor = Cursor::new(&data[inner.position() as usize..end]);
            let message = Message::decode(&mut message_cursor)?;
            inner.set_position(end as u64);
            entries.push(MessageSetEntry { offset, message });
        }
        Ok(MessageSet { entries })
    }
}
