//! Text codec, also the fallback for types without a dedicated codec.

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{TypeCodec, Value, utf8};

/// Text-like types (`text`, `varchar`, `bpchar`, `name`, `json`, `unknown`).
///
/// Encodes any value through its text representation, so it also serves
/// parameters whose inferred type has no codec of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TypeCodec for TextCodec {
    fn format(&self) -> FormatCode {
        FormatCode::Text
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        match value.to_text() {
            Some(text) => {
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
            None => Err(Error::Encode("NULL has no text representation".into())),
        }
    }

    fn decode(&self, _format: FormatCode, bytes: &[u8]) -> Result<Value> {
        // The binary form of text-like types is the same UTF-8 text
        Ok(Value::Text(utf8(bytes)?.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_any_value_as_text() {
        let mut buf = Vec::new();
        TextCodec.encode(&Value::Int8(-5), &mut buf).unwrap();
        assert_eq!(buf, b"-5");
        assert!(TextCodec.encode(&Value::Null, &mut buf).is_err());
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(matches!(
            TextCodec.decode(FormatCode::Text, &[0xff, 0xfe]),
            Err(Error::Decode(_))
        ));
        assert_eq!(
            TextCodec.decode(FormatCode::Text, "héllo".as_bytes()).unwrap(),
            Value::Text("héllo".into())
        );
    }
}
