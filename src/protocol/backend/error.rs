//! ErrorResponse and NoticeResponse field parsing.

use crate::error::{Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Parse the (code, value) pairs shared by ErrorResponse and NoticeResponse.
pub fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = ServerError::default();
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let slot = match code {
            field_type::SEVERITY => &mut fields.severity,
            field_type::SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
            field_type::CODE => &mut fields.code,
            field_type::MESSAGE => &mut fields.message,
            field_type::DETAIL => &mut fields.detail,
            field_type::HINT => &mut fields.hint,
            field_type::INTERNAL_QUERY => &mut fields.internal_query,
            field_type::WHERE => &mut fields.where_,
            field_type::SCHEMA => &mut fields.schema,
            field_type::TABLE => &mut fields.table,
            field_type::COLUMN => &mut fields.column,
            field_type::DATA_TYPE => &mut fields.data_type,
            field_type::CONSTRAINT => &mut fields.constraint,
            field_type::FILE => &mut fields.file,
            field_type::ROUTINE => &mut fields.routine,
            field_type::POSITION => {
                fields.position = value.parse().ok();
                continue;
            }
            field_type::INTERNAL_POSITION => {
                fields.internal_position = value.parse().ok();
                continue;
            }
            field_type::LINE => {
                fields.line = value.parse().ok();
                continue;
            }
            _ => {
                tracing::debug!("ignoring unknown error field type {:?}", code as char);
                continue;
            }
        };
        *slot = Some(value.to_string());
    }

    Ok(fields)
}
