//! Kafka Wire Codec
//!
//! Encoding and decoding of the primitive and compound types that make up
//! every Kafka request and response body.
//!
//! - All integers are encoded in network byte order (big-endian)
//! - Strings are length-prefixed with an int16 length
//! - Byte blobs are length-prefixed with an int32 length
//! - Arrays are prefixed with an int32 element count
//! - A length of -1 marks a null value
//!
//! Compound records carry no tag or length of their own: they are the ordered
//! concatenation of their fields. Declare them with [`wire_record!`](crate::wire_record)
//! so that encode and decode always follow the declaration order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Buffer underrun: needed {needed}, available {available}")]
    BufferUnderrun { needed: usize, available: usize },
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8 string: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),
    #[error("Unknown assignment protocol: {0}")]
    UnknownProtocol(String),
    #[error("{kind} of {length} bytes exceeds the wire limit of {max}")]
    TooLong {
        kind: &'static str,
        length: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// A value with a Kafka wire representation.
///
/// Decoding threads a single cursor through nested calls, so a record decodes
/// its fields by handing the same cursor to each field in turn.
pub trait Wire: Sized {
    /// Append the wire form to `buf`. Fails when a length does not fit its
    /// prefix; `buf` may then hold a partial encoding.
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode from the start of `data`. Trailing bytes are ignored.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        Self::decode(&mut cursor)
    }
}

/// Length of a string or blob as its wire prefix type
pub(crate) fn length_prefix<T: TryFrom<usize>>(
    kind: &'static str,
    length: usize,
    max: usize,
) -> Result<T> {
    T::try_from(length).map_err(|_| CodecError::TooLong { kind, length, max })
}

pub(crate) fn ensure_remaining(cursor: &Cursor<&[u8]>, needed: usize) -> Result<()> {
    let available = cursor.remaining();
    if available < needed {
        return Err(CodecError::BufferUnderrun { needed, available });
    }
    Ok(())
}

macro_rules! fixed_width {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Wire for $ty {
                fn encode(&self, buf: &mut BytesMut) -> Result<()> {
                    buf.$put(*self);
                    Ok(())
                }

                fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
                    ensure_remaining(cursor, std::mem::size_of::<$ty>())?;
                    Ok(cursor.$get())
                }
            }
        )*
    };
}

fixed_width! {
    i8 => put_i8, get_i8;
    i16 => put_i16, get_i16;
    i32 => put_i32, get_i32;
    i64 => put_i64, get_i64;
    u32 => put_u32, get_u32;
}

impl Wire for bool {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        ensure_remaining(cursor, 1)?;
        Ok(cursor.get_u8() != 0)
    }
}

fn read_utf8(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<String> {
    ensure_remaining(cursor, len)?;
    let mut buf = vec![0u8; len];
    cursor.copy_to_slice(&mut buf);
    Ok(String::from_utf8(buf)?)
}

/// Non-nullable string. A null on the wire decodes to the empty string.
impl Wire for String {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i16(length_prefix::<i16>("string", self.len(), i16::MAX as usize)?);
        buf.put_slice(self.as_bytes());
        Ok(())
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = i16::decode(cursor)?;
        if len <= 0 {
            return Ok(String::new());
        }
        read_utf8(cursor, len as usize)
    }
}

impl Wire for Option<String> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Some(s) => s.encode(buf),
            None => (-1i16).encode(buf),
        }
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = i16::decode(cursor)?;
        if len < 0 {
            return Ok(None);
        }
        read_utf8(cursor, len as usize).map(Some)
    }
}

/// Non-nullable byte blob. A null on the wire decodes to an empty blob.
impl Wire for Bytes {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(length_prefix::<i32>("byte blob", self.len(), i32::MAX as usize)?);
        buf.put_slice(self);
        Ok(())
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = i32::decode(cursor)?;
        if len <= 0 {
            return Ok(Bytes::new());
        }
        ensure_remaining(cursor, len as usize)?;
        Ok(cursor.copy_to_bytes(len as usize))
    }
}

impl Wire for Option<Bytes> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Some(bytes) => bytes.encode(buf),
            None => (-1i32).encode(buf),
        }
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = i32::decode(cursor)?;
        if len < 0 {
            return Ok(None);
        }
        ensure_remaining(cursor, len as usize)?;
        Ok(Some(cursor.copy_to_bytes(len as usize)))
    }
}

/// Homogeneous array. A negative element count decodes to an empty array.
impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(length_prefix::<i32>("array", self.len(), i32::MAX as usize)?);
        for item in self {
            item.encode(buf)?;
        }
        Ok(())
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let count = i32::decode(cursor)?;
        if count <= 0 {
            return Ok(Vec::new());
        }
        // Every element occupies at least one byte, cap the preallocation accordingly
        let mut items = Vec::with_capacity((count as usize).min(cursor.remaining()));
        for _ in 0..count {
            items.push(T::decode(cursor)?);
        }
        Ok(items)
    }
}

/// Declare a compound wire record.
///
/// The generated `Wire` impl encodes and decodes the fields in declaration
/// order. Struct expression fields are evaluated in source order, which keeps
/// the decode side aligned with the encode side.
#[macro_export]
macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::codec::Wire for $name {
            #[allow(unused_variables)]
            fn encode(&self, buf: &mut ::bytes::BytesMut) -> $crate::codec::Result<()> {
                $( $crate::codec::Wire::encode(&self.$field, buf)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode(cursor: &mut ::std::io::Cursor<&[u8]>) -> $crate::codec::Result<Self> {
                Ok(Self {
                    $( $field: <$ty as $crate::codec::Wire>::decode(cursor)?, )*
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Wire + PartialEq + std::fmt::Debug>(value: T) {
        let encoded = value.to_bytes().unwrap();
        let decoded = T::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.to_bytes().unwrap(), encoded);
    }

    #[test]
    fn test_fixed_width_extremes() {
        roundtrip(i8::MIN);
        roundtrip(i8::MAX);
        roundtrip(i16::MIN);
        roundtrip(i16::MAX);
        roundtrip(i32::MIN);
        roundtrip(i32::MAX);
        roundtrip(i64::MIN);
        roundtrip(i64::MAX);
        roundtrip(u32::MAX);
        roundtrip(true);
        roundtrip(false);
    }

    #[test]
    fn test_integers_are_big_endian() {
        assert_eq!(0x0102i16.to_bytes().unwrap().as_ref(), &[0x01, 0x02]);
        assert_eq!(0x01020304i32.to_bytes().unwrap().as_ref(), &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            1i64.to_bytes().unwrap().as_ref(),
            &[0, 0, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_string_encoding_decoding() {
        roundtrip("hello world".to_string());
        roundtrip(String::new());

        let encoded = "abc".to_string().to_bytes().unwrap();
        assert_eq!(encoded.as_ref(), &[0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_string_longer_than_int16_is_rejected() {
        roundtrip("x".repeat(i16::MAX as usize));

        let err = "x".repeat(40_000).to_bytes().unwrap_err();
        assert!(matches!(
            err,
            CodecError::TooLong {
                kind: "string",
                length: 40_000,
                max: 32_767
            }
        ));

        let nullable = Some("y".repeat(40_000));
        assert!(matches!(nullable.to_bytes(), Err(CodecError::TooLong { .. })));
    }

    #[test]
    fn test_null_string_decodes_to_empty() {
        let decoded = String::from_bytes(&[0xff, 0xff]).unwrap();
        assert_eq!(decoded, "");

        let nullable = Option::<String>::from_bytes(&[0xff, 0xff]).unwrap();
        assert_eq!(nullable, None);
    }

    #[test]
    fn test_null_bytes_decode_to_empty() {
        let decoded = Bytes::from_bytes(&[0xff, 0xff, 0xff, 0xff]).unwrap();
        assert!(decoded.is_empty());

        roundtrip(Bytes::from_static(b"test data"));
        roundtrip(Some(Bytes::from_static(b"k")));
        roundtrip(Option::<Bytes>::None);
    }

    #[test]
    fn test_arrays() {
        roundtrip(Vec::<i32>::new());
        roundtrip(vec![7i32]);
        roundtrip(vec!["a".to_string(), "bb".to_string(), "ccc".to_string()]);
        roundtrip(vec![vec![1i64, 2], vec![], vec![3]]);
    }

    #[test]
    fn test_negative_array_count_decodes_empty() {
        let decoded = Vec::<i32>::from_bytes(&[0xff, 0xff, 0xff, 0xff]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let err = i32::from_bytes(&[0, 1]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::BufferUnderrun {
                needed: 4,
                available: 2
            }
        ));

        let err = String::from_bytes(&[0, 5, b'a']).unwrap_err();
        assert!(matches!(err, CodecError::BufferUnderrun { .. }));
    }

    wire_record! {
        pub struct Pair {
            pub name: String,
            pub values: Vec<i16>,
            pub flag: bool,
        }
    }

    #[test]
    fn test_record_fields_follow_declaration_order() {
        let pair = Pair {
            name: "x".to_string(),
            values: vec![1, 2],
            flag: true,
        };
        let encoded = pair.to_bytes().unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0, 1, b'x', 0, 0, 0, 2, 0, 1, 0, 2, 1]
        );
        roundtrip(pair);
    }
}
