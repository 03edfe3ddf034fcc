//! Codecs for bool, integers, oid and floats.

use std::num::TryFromIntError;

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{TypeCodec, Value, utf8};

fn encode_mismatch(value: &Value, target: &str) -> Error {
    Error::Encode(format!(
        "cannot encode {} value as {}",
        value.type_name(),
        target
    ))
}

fn fixed<const N: usize>(bytes: &[u8], target: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_e| Error::Decode(format!("invalid {} length: {}", target, bytes.len())))
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8], target: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    utf8(bytes)?
        .trim()
        .parse()
        .map_err(|e| Error::Decode(format!("invalid {}: {}", target, e)))
}

/// `bool`, binary format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl TypeCodec for BoolCodec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Bool(v) => {
                buf.push(u8::from(*v));
                Ok(())
            }
            other => Err(encode_mismatch(other, "bool")),
        }
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        match format {
            FormatCode::Binary => {
                let [b] = fixed::<1>(bytes, "bool")?;
                Ok(Value::Bool(b != 0))
            }
            FormatCode::Text => match bytes {
                b"t" | b"true" => Ok(Value::Bool(true)),
                b"f" | b"false" => Ok(Value::Bool(false)),
                _ => Err(Error::Decode(format!(
                    "invalid boolean: {:?}",
                    String::from_utf8_lossy(bytes)
                ))),
            },
        }
    }
}

/// Width of an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Two,
    Four,
    Eight,
}

/// `int2`, `int4` and `int8`, binary format.
///
/// Any integer value is accepted and range-checked against the column width.
#[derive(Debug, Clone, Copy)]
pub struct IntCodec(pub IntWidth);

impl TypeCodec for IntCodec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        let wide = match value {
            Value::Int2(v) => i64::from(*v),
            Value::Int4(v) => i64::from(*v),
            Value::Int8(v) => *v,
            other => return Err(encode_mismatch(other, "integer")),
        };
        let out_of_range =
            |_e: TryFromIntError| Error::Encode(format!("{} out of range for {:?}", wide, self.0));
        match self.0 {
            IntWidth::Two => {
                let v = i16::try_from(wide).map_err(out_of_range)?;
                buf.extend_from_slice(&v.to_be_bytes());
            }
            IntWidth::Four => {
                let v = i32::try_from(wide).map_err(out_of_range)?;
                buf.extend_from_slice(&v.to_be_bytes());
            }
            IntWidth::Eight => buf.extend_from_slice(&wide.to_be_bytes()),
        }
        Ok(())
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        match (self.0, format) {
            (IntWidth::Two, FormatCode::Binary) => {
                Ok(Value::Int2(i16::from_be_bytes(fixed(bytes, "int2")?)))
            }
            (IntWidth::Four, FormatCode::Binary) => {
                Ok(Value::Int4(i32::from_be_bytes(fixed(bytes, "int4")?)))
            }
            (IntWidth::Eight, FormatCode::Binary) => {
                Ok(Value::Int8(i64::from_be_bytes(fixed(bytes, "int8")?)))
            }
            (IntWidth::Two, FormatCode::Text) => Ok(Value::Int2(parse_text(bytes, "int2")?)),
            (IntWidth::Four, FormatCode::Text) => Ok(Value::Int4(parse_text(bytes, "int4")?)),
            (IntWidth::Eight, FormatCode::Text) => Ok(Value::Int8(parse_text(bytes, "int8")?)),
        }
    }
}

/// `oid`, an unsigned 32-bit integer surfaced as `Int8`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OidCodec;

impl TypeCodec for OidCodec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        let wide = match value {
            Value::Int2(v) => i64::from(*v),
            Value::Int4(v) => i64::from(*v),
            Value::Int8(v) => *v,
            other => return Err(encode_mismatch(other, "oid")),
        };
        let oid = u32::try_from(wide)
            .map_err(|_e| Error::Encode(format!("{} out of range for oid", wide)))?;
        buf.extend_from_slice(&oid.to_be_bytes());
        Ok(())
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        let oid = match format {
            FormatCode::Binary => u32::from_be_bytes(fixed(bytes, "oid")?),
            FormatCode::Text => parse_text(bytes, "oid")?,
        };
        Ok(Value::Int8(i64::from(oid)))
    }
}

/// Parse the text form of a float, including `NaN` and `[-]Infinity`.
fn parse_float(bytes: &[u8]) -> Result<f64> {
    match bytes {
        b"NaN" => Ok(f64::NAN),
        b"Infinity" => Ok(f64::INFINITY),
        b"-Infinity" => Ok(f64::NEG_INFINITY),
        _ => parse_text(bytes, "float"),
    }
}

/// `float4`, binary format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float4Codec;

impl TypeCodec for Float4Codec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        let v = match value {
            Value::Float4(v) => *v,
            Value::Int2(v) => f32::from(*v),
            other => return Err(encode_mismatch(other, "float4")),
        };
        buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        match format {
            FormatCode::Binary => Ok(Value::Float4(f32::from_be_bytes(fixed(bytes, "float4")?))),
            FormatCode::Text => match bytes {
                b"NaN" => Ok(Value::Float4(f32::NAN)),
                b"Infinity" => Ok(Value::Float4(f32::INFINITY)),
                b"-Infinity" => Ok(Value::Float4(f32::NEG_INFINITY)),
                _ => Ok(Value::Float4(parse_text(bytes, "float4")?)),
            },
        }
    }
}

/// `float8`, binary format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float8Codec;

impl TypeCodec for Float8Codec {
    fn format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
        let v = match value {
            Value::Float8(v) => *v,
            Value::Float4(v) => f64::from(*v),
            Value::Int2(v) => f64::from(*v),
            Value::Int4(v) => f64::from(*v),
            other => return Err(encode_mismatch(other, "float8")),
        };
        buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        match format {
            FormatCode::Binary => Ok(Value::Float8(f64::from_be_bytes(fixed(bytes, "float8")?))),
            FormatCode::Text => Ok(Value::Float8(parse_float(bytes)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_widening_and_range() {
        let codec = IntCodec(IntWidth::Eight);
        let mut buf = Vec::new();
        codec.encode(&Value::Int2(-2), &mut buf).unwrap();
        assert_eq!(buf, (-2_i64).to_be_bytes());

        let narrow = IntCodec(IntWidth::Two);
        let mut buf = Vec::new();
        assert!(matches!(
            narrow.encode(&Value::Int8(70_000), &mut buf),
            Err(Error::Encode(_))
        ));
        assert!(matches!(
            narrow.encode(&Value::Text("1".into()), &mut buf),
            Err(Error::Encode(_))
        ));
    }

    #[test]
    fn int_decoding() {
        let codec = IntCodec(IntWidth::Four);
        assert_eq!(
            codec.decode(FormatCode::Text, b"-42").unwrap(),
            Value::Int4(-42)
        );
        assert_eq!(
            codec.decode(FormatCode::Binary, &7_i32.to_be_bytes()).unwrap(),
            Value::Int4(7)
        );
        assert!(codec.decode(FormatCode::Binary, &[0, 1]).is_err());
        assert!(codec.decode(FormatCode::Text, b"4x").is_err());
    }

    #[test]
    fn float_special_values() {
        let codec = Float8Codec;
        assert_eq!(
            codec.decode(FormatCode::Text, b"-Infinity").unwrap(),
            Value::Float8(f64::NEG_INFINITY)
        );
        match codec.decode(FormatCode::Text, b"NaN").unwrap() {
            Value::Float8(v) => assert!(v.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            Float4Codec.decode(FormatCode::Text, b"1.5").unwrap(),
            Value::Float4(1.5)
        );
    }

    #[test]
    fn bool_forms() {
        assert_eq!(
            BoolCodec.decode(FormatCode::Text, b"t").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            BoolCodec.decode(FormatCode::Binary, &[0]).unwrap(),
            Value::Bool(false)
        );
        assert!(BoolCodec.decode(FormatCode::Text, b"yes").is_err());
    }

    #[test]
    fn oid_is_unsigned() {
        let mut buf = Vec::new();
        OidCodec.encode(&Value::Int8(4_000_000_000), &mut buf).unwrap();
        assert_eq!(
            OidCodec.decode(FormatCode::Binary, &buf).unwrap(),
            Value::Int8(4_000_000_000)
        );
        assert!(OidCodec.encode(&Value::Int4(-1), &mut buf).is_err());
    }
}
