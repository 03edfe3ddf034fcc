//! COPY protocol backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u8};
use crate::protocol::types::FormatCode;

/// Body shared by CopyInResponse, CopyOutResponse and CopyBothResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format_byte, rest) = read_u8(payload)?;
        let format = FormatCode::from_wire(i16::from(format_byte))?;

        let (num_columns, mut rest) = read_i16(rest)?;
        let num_columns = usize::try_from(num_columns)
            .map_err(|_e| Error::Protocol(format!("COPY response: negative count {num_columns}")))?;

        let mut column_formats = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            let (fmt, remaining) = read_i16(rest)?;
            column_formats.push(FormatCode::from_wire(fmt)?);
            rest = remaining;
        }

        Ok(Self {
            format,
            column_formats,
        })
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_copy_response() {
        let payload = [0, 0, 2, 0, 0, 0, 0];
        let response = CopyResponse::parse(&payload).unwrap();
        assert!(!response.is_binary());
        assert_eq!(response.column_formats, vec![FormatCode::Text; 2]);
        assert!(CopyResponse::parse(&payload[..4]).is_err());
    }
}
