//! Query-related backend messages.

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

impl FieldDescriptionTail {
    /// Build a tail from native values.
    pub fn new(
        table_oid: Oid,
        column_id: i16,
        type_oid: Oid,
        type_size: i16,
        type_modifier: i32,
        format: FormatCode,
    ) -> Self {
        Self {
            table_oid: U32BE::new(table_oid),
            column_id: I16BE::new(column_id),
            type_oid: U32BE::new(type_oid),
            type_size: I16BE::new(type_size),
            type_modifier: I32BE::new(type_modifier),
            format: U16BE::new(format as u16),
        }
    }

    pub fn table_oid(&self) -> Oid {
        self.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.type_modifier.get()
    }

    /// Format code. Values other than 0 and 1 are rejected while parsing.
    pub fn format(&self) -> FormatCode {
        if self.format.get() == 1 {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid()
    }

    pub fn format(&self) -> FormatCode {
        self.tail.format()
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug, Clone)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_fields, mut data) = read_i16(payload)?;
        let num_fields = usize::try_from(num_fields)
            .map_err(|_e| Error::Protocol(format!("RowDescription: negative count {num_fields}")))?;

        let mut fields = Vec::with_capacity(num_fields);
        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = FieldDescriptionTail::ref_from_prefix(rest).map_err(|_e| {
                Error::Protocol(format!("RowDescription: truncated field {name:?}"))
            })?;
            FormatCode::from_wire(tail.format.get() as i16)?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }
}

/// DataRow message - contains a single row of data.
///
/// The column framing is validated once in [`DataRow::parse`], so iteration
/// never has to deal with truncated input.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_i16(payload)?;
        let num_columns = u16::try_from(num_columns)
            .map_err(|_e| Error::Protocol(format!("DataRow: negative count {num_columns}")))?;

        let mut rest = columns_data;
        for _ in 0..num_columns {
            let (len, after_len) = read_i32(rest)?;
            rest = match len {
                -1 => after_len,
                len if len >= 0 => read_bytes(after_len, len as usize)?.1,
                len => return Err(Error::Protocol(format!("DataRow: invalid length {len}"))),
            };
        }
        if !rest.is_empty() {
            return Err(Error::Protocol(format!(
                "DataRow: {} trailing bytes",
                rest.len()
            )));
        }

        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Create an iterator over column values.
    ///
    /// Each item is `Option<&[u8]>` where `None` represents NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }

    /// Get a column value by index.
    pub fn get(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.iter().nth(index)
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let (len, rest) = read_i32(self.remaining).ok()?;
        if len < 0 {
            self.remaining = rest;
            return Some(None);
        }
        let (value, rest) = rest.split_at_checked(len as usize)?;
        self.remaining = rest;
        Some(Some(value))
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Rows affected according to the command tag, see [`rows_affected`].
    pub fn rows_affected(&self, server_major: Option<u32>) -> Option<u64> {
        rows_affected(self.tag, server_major)
    }

    /// Get the command name from the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

/// Extract the affected-row count from a command tag.
///
/// Only INSERT, DELETE, UPDATE, MOVE, FETCH, COPY and SELECT report a count.
/// Servers older than 9.0 send a bare `SELECT` tag, so SELECT counts are only
/// trusted when the server major version is at least 9 or unknown.
pub fn rows_affected(tag: &str, server_major: Option<u32>) -> Option<u64> {
    let mut parts = tag.split_whitespace();
    let command = parts.next()?;
    let count = match command {
        // INSERT oid rows
        "INSERT" => parts.nth(1)?,
        "DELETE" | "UPDATE" | "MOVE" | "FETCH" | "COPY" => parts.next()?,
        "SELECT" if server_major.is_none_or(|major| major >= 9) => parts.next()?,
        _ => return None,
    };
    count.parse().ok()
}
