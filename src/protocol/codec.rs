//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers. Every
//! reader returns the decoded value together with the unread remainder and
//! fails with [`Error::Protocol`] instead of panicking on short input.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16, I32, U16, U32};

use crate::error::{Error, Result};

macro_rules! read_int {
    ($(#[$doc:meta])* $name:ident, $native:ty, $wire:ty) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(data: &[u8]) -> Result<($native, &[u8])> {
            let (value, rest) = <$wire>::read_from_prefix(data).map_err(|_e| {
                Error::Protocol(format!(
                    concat!(stringify!($name), ": buffer too short: {} < {}"),
                    data.len(),
                    size_of::<$native>()
                ))
            })?;
            Ok((value.get(), rest))
        }
    };
}

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

read_int!(
    /// Read 2-byte big-endian signed integer.
    read_i16, i16, I16
);
read_int!(
    /// Read 2-byte big-endian unsigned integer.
    read_u16, u16, U16
);
read_int!(
    /// Read 4-byte big-endian signed integer.
    read_i32, i32, I32
);
read_int!(
    /// Read 4-byte big-endian unsigned integer.
    read_u32, u32, U32
);

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        ))
    })
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
    let (bytes, rest) = data.split_at(pos);
    Ok((bytes, rest.get(1..).unwrap_or_default()))
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    Ok((decode_utf8(bytes)?, rest))
}

/// Validate UTF-8 text received from the server.
#[inline]
pub fn decode_utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("invalid UTF-8: {e}")))
}

/// Write 1-byte unsigned integer.
#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte big-endian signed integer.
#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian signed integer.
#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian unsigned integer.
#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write null-terminated string from &str.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Clamp a collection length to the int16 count fields used by the protocol.
#[inline]
pub fn count_i16(len: usize) -> i16 {
    i16::try_from(len).unwrap_or(i16::MAX)
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_untagged(buf)
    }

    /// Start building a pre-authentication message (no type byte).
    pub fn new_untagged(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Get mutable access to the underlying buffer.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        write_u8(self.buf, value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = i32::try_from(self.buf.len() - self.start).unwrap_or(i32::MAX);
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
    }
}
