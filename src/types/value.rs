//! Dynamic parameter and column values.

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    #[cfg(feature = "with-uuid")]
    Uuid(uuid::Uuid),
}

impl Value {
    /// OID announced in Parse for a parameter of this value.
    ///
    /// Text and NULL report 0 so the server infers the type from context.
    pub fn natural_oid(&self) -> Oid {
        match self {
            Value::Null | Value::Text(_) => oid::UNSPECIFIED,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Bytea(_) => oid::BYTEA,
            #[cfg(feature = "with-uuid")]
            Value::Uuid(_) => oid::UUID,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// PostgreSQL text representation, `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(true) => "t".to_string(),
            Value::Bool(false) => "f".to_string(),
            Value::Int2(v) => v.to_string(),
            Value::Int4(v) => v.to_string(),
            Value::Int8(v) => v.to_string(),
            Value::Float4(v) if v.is_finite() => v.to_string(),
            Value::Float4(v) => float_text(f64::from(*v)),
            Value::Float8(v) => float_text(*v),
            Value::Text(v) => v.clone(),
            Value::Bytea(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for byte in v {
                    out.push(HEX[usize::from(byte >> 4)] as char);
                    out.push(HEX[usize::from(byte & 0x0f)] as char);
                }
                out
            }
            #[cfg(feature = "with-uuid")]
            Value::Uuid(v) => v.hyphenated().to_string(),
        };
        Some(text)
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            #[cfg(feature = "with-uuid")]
            Value::Uuid(_) => "uuid",
        }
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        v.to_string()
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    &str => Text,
    Vec<u8> => Bytea,
    &[u8] => Bytea,
}

#[cfg(feature = "with-uuid")]
impl_from! { uuid::Uuid => Uuid }

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a decoded [`Value`] into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::Decode(format!(
        "cannot convert {} value to {}",
        value.type_name(),
        target
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => mismatch(other, "bool"),
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int2(v) => Ok(*v),
            other => mismatch(other, "i16"),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int2(v) => Ok(i32::from(*v)),
            Value::Int4(v) => Ok(*v),
            other => mismatch(other, "i32"),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int2(v) => Ok(i64::from(*v)),
            Value::Int4(v) => Ok(i64::from(*v)),
            Value::Int8(v) => Ok(*v),
            other => mismatch(other, "i64"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(*v),
            other => mismatch(other, "f32"),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(f64::from(*v)),
            Value::Float8(v) => Ok(*v),
            other => mismatch(other, "f64"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            other => mismatch(other, "String"),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytea(v) => Ok(v.clone()),
            other => mismatch(other, "Vec<u8>"),
        }
    }
}

#[cfg(feature = "with-uuid")]
impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            other => mismatch(other, "Uuid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_forms() {
        assert_eq!(Value::Bool(true).to_text().as_deref(), Some("t"));
        assert_eq!(Value::Float8(f64::NAN).to_text().as_deref(), Some("NaN"));
        assert_eq!(
            Value::Float4(f32::NEG_INFINITY).to_text().as_deref(),
            Some("-Infinity")
        );
        assert_eq!(
            Value::Bytea(vec![0xde, 0xad, 0x01]).to_text().as_deref(),
            Some("\\xdead01")
        );
        assert_eq!(Value::Null.to_text(), None);
    }

    #[test]
    fn natural_oids() {
        assert_eq!(Value::from(1_i64).natural_oid(), oid::INT8);
        assert_eq!(Value::from("x").natural_oid(), oid::UNSPECIFIED);
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn widening_conversions() {
        assert_eq!(i64::from_value(&Value::Int2(7)).unwrap(), 7);
        assert_eq!(Option::<i32>::from_value(&Value::Null).unwrap(), None);
        assert!(matches!(
            i16::from_value(&Value::Int8(1)),
            Err(Error::Decode(_))
        ));
    }
}
