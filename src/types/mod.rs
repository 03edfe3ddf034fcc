//! Value codecs keyed by type OID.
//!
//! A [`TypeRegistry`] maps each type OID to a [`TypeCodec`]. The connection
//! uses it to encode Bind parameters and to decode DataRow columns. OIDs
//! without a codec fall back to text.

mod bytes;
mod primitives;
mod string;
mod value;

#[cfg(feature = "with-uuid")]
mod uuid;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

pub use bytes::ByteaCodec;
pub use primitives::{BoolCodec, Float4Codec, Float8Codec, IntCodec, IntWidth, OidCodec};
pub use string::TextCodec;
pub use value::{FromValue, Value};

#[cfg(feature = "with-uuid")]
pub use self::uuid::UuidCodec;

/// Encoder and decoder for one PostgreSQL type.
pub trait TypeCodec: Send + Sync + fmt::Debug {
    /// Format used for parameters and requested for result columns.
    fn format(&self) -> FormatCode;

    /// Append the wire form of `value` in [`Self::format`], without a length prefix.
    fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<()>;

    /// Decode a non-NULL column value.
    ///
    /// Simple queries always deliver text, so codecs accept both formats.
    fn decode(&self, format: FormatCode, bytes: &[u8]) -> Result<Value>;
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

/// OID-keyed codec table with a text fallback.
#[derive(Clone)]
pub struct TypeRegistry {
    codecs: HashMap<Oid, Arc<dyn TypeCodec>>,
    fallback: Arc<dyn TypeCodec>,
}

impl TypeRegistry {
    /// A registry with the built-in codecs.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(oid::BOOL, BoolCodec);
        registry.register(oid::BYTEA, ByteaCodec);
        registry.register(oid::INT2, IntCodec(IntWidth::Two));
        registry.register(oid::INT4, IntCodec(IntWidth::Four));
        registry.register(oid::INT8, IntCodec(IntWidth::Eight));
        registry.register(oid::OID, OidCodec);
        registry.register(oid::FLOAT4, Float4Codec);
        registry.register(oid::FLOAT8, Float8Codec);
        for text_oid in [
            oid::TEXT,
            oid::VARCHAR,
            oid::BPCHAR,
            oid::NAME,
            oid::JSON,
            oid::UNKNOWN,
        ] {
            registry.register(text_oid, TextCodec);
        }
        #[cfg(feature = "with-uuid")]
        registry.register(oid::UUID, UuidCodec);
        registry
    }

    /// A registry where every OID uses the text fallback.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
            fallback: Arc::new(TextCodec),
        }
    }

    /// Register a codec, returning the one it replaces.
    pub fn register<C: TypeCodec + 'static>(
        &mut self,
        type_oid: Oid,
        codec: C,
    ) -> Option<Arc<dyn TypeCodec>> {
        self.codecs.insert(type_oid, Arc::new(codec))
    }

    pub fn unregister(&mut self, type_oid: Oid) -> Option<Arc<dyn TypeCodec>> {
        self.codecs.remove(&type_oid)
    }

    /// Codec for `type_oid`, or the text fallback.
    pub fn get(&self, type_oid: Oid) -> &Arc<dyn TypeCodec> {
        self.codecs.get(&type_oid).unwrap_or(&self.fallback)
    }

    pub fn contains(&self, type_oid: Oid) -> bool {
        self.codecs.contains_key(&type_oid)
    }

    /// Format to request for a result column of this type.
    pub fn result_format(&self, type_oid: Oid) -> FormatCode {
        self.codecs
            .get(&type_oid)
            .map_or(FormatCode::Text, |codec| codec.format())
    }

    /// Encode a Bind parameter for a parameter slot of type `type_oid`.
    ///
    /// Returns `None` for NULL. Text values are always sent in text format so
    /// the server parses them into whatever type it inferred. An unspecified
    /// OID picks the codec of the value's natural type.
    pub fn encode(&self, type_oid: Oid, value: &Value) -> Result<Option<(FormatCode, Vec<u8>)>> {
        if value.is_null() {
            return Ok(None);
        }
        let codec = match value {
            Value::Text(_) => &self.fallback,
            _ if type_oid == oid::UNSPECIFIED => self.get(value.natural_oid()),
            _ => self.get(type_oid),
        };
        let mut buf = Vec::new();
        codec.encode(value, &mut buf)?;
        Ok(Some((codec.format(), buf)))
    }

    /// Decode a column value; `None` is SQL NULL.
    pub fn decode(&self, type_oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value> {
        match bytes {
            None => Ok(Value::Null),
            Some(bytes) => self.get(type_oid).decode(format, bytes),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut oids: Vec<_> = self.codecs.keys().copied().collect();
        oids.sort_unstable();
        f.debug_struct("TypeRegistry").field("oids", &oids).finish()
    }
}
