//! `bytea` codec.

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{TypeCodec, Value};

/// `bytea`, binary format.
///
/// The text form is decoded from both the hex (`\x...`) and the legacy
/// escape output formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteaCodec;

impl TypeCodec for ByteaCodec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Bytea(v) => {
                buf.extend_from_slice(v);
                Ok(())
            }
            other => Err(Error::Encode(format!(
                "cannot encode {} value as bytea",
                other.type_name()
            ))),
        }
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        match format {
            FormatCode::Binary => Ok(Value::Bytea(bytes.to_vec())),
            FormatCode::Text => match bytes.strip_prefix(b"\\x") {
                Some(hex) => decode_hex(hex).map(Value::Bytea),
                None => decode_escape(bytes).map(Value::Bytea),
            },
        }
    }
}

/// Decode hex string to bytes
fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        result.push((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?);
    }
    Ok(result)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

/// Decode the escape format: `\\` is a backslash, `\ooo` an octal byte.
fn decode_escape(text: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(text.len());
    let mut rest = text;
    while let Some((&b, tail)) = rest.split_first() {
        if b != b'\\' {
            result.push(b);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', after @ ..] => {
                result.push(b'\\');
                rest = after;
            }
            [d0 @ b'0'..=b'3', d1 @ b'0'..=b'7', d2 @ b'0'..=b'7', after @ ..] => {
                result.push(((d0 - b'0') << 6) | ((d1 - b'0') << 3) | (d2 - b'0'));
                rest = after;
            }
            _ => return Err(Error::Decode("invalid bytea escape sequence".into())),
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytea_hex() {
        assert_eq!(
            ByteaCodec.decode(FormatCode::Text, b"\\xDEADbeef").unwrap(),
            Value::Bytea(vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
        assert!(ByteaCodec.decode(FormatCode::Text, b"\\xabc").is_err());
        assert!(ByteaCodec.decode(FormatCode::Text, b"\\xzz").is_err());
    }

    #[test]
    fn bytea_escape() {
        assert_eq!(
            ByteaCodec.decode(FormatCode::Text, b"a\\\\b\\000\\377").unwrap(),
            Value::Bytea(vec![b'a', b'\\', b'b', 0, 0xff])
        );
        assert!(ByteaCodec.decode(FormatCode::Text, b"\\9").is_err());
    }

    #[test]
    fn bytea_binary_is_raw() {
        let mut buf = Vec::new();
        ByteaCodec
            .encode(&Value::Bytea(vec![0, 1, 2]), &mut buf)
            .unwrap();
        assert_eq!(buf, [0, 1, 2]);
        assert_eq!(
            ByteaCodec.decode(FormatCode::Binary, &buf).unwrap(),
            Value::Bytea(vec![0, 1, 2])
        );
    }
}
