//! UUID codec (uuid crate).

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{TypeCodec, Value, utf8};

/// `uuid`, binary format. Text values are parsed client-side.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCodec;

impl TypeCodec for UuidCodec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        let uuid = match value {
            Value::Uuid(v) => *v,
            Value::Text(s) => uuid::Uuid::parse_str(s)
                .map_err(|e| Error::Encode(format!("invalid UUID: {}", e)))?,
            other => {
                return Err(Error::Encode(format!(
                    "cannot encode {} value as uuid",
                    other.type_name()
                )));
            }
        };
        buf.extend_from_slice(uuid.as_bytes());
        Ok(())
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        let uuid = match format {
            FormatCode::Binary => uuid::Uuid::from_slice(bytes),
            FormatCode::Text => uuid::Uuid::parse_str(utf8(bytes)?),
        }
        .map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))?;
        Ok(Value::Uuid(uuid))
    }
}
