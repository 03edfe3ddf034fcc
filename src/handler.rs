//! Result handlers.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow, RowDescription, rows_affected};
use crate::row::{FromRow, Row};
use crate::state::extended::ColumnInfo;
use crate::types::TypeRegistry;

/// Receives the results of a query cycle.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only
///
/// For multi-statement queries like `"SELECT 1; UPDATE foo SET x=1"`:
/// ```text
/// result_start → row* → result_end   // SELECT 1
/// result_end                          // UPDATE
/// ```
///
/// An error returned from a callback is raised after the cycle has drained
/// to ReadyForQuery, and the handler receives no further callbacks.
pub trait ResultHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()>;

    /// Called when a statement completes.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// A handler that discards rows and keeps the last command tag.
#[derive(Debug, Default)]
pub struct DropHandler {
    command: Option<String>,
}

impl DropHandler {
    /// Create a new drop handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag of the last completed command.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Rows affected by the last command, see [`rows_affected`].
    pub fn rows_affected(&self, server_major: Option<u32>) -> Option<u64> {
        self.command
            .as_deref()
            .and_then(|tag| rows_affected(tag, server_major))
    }
}

impl ResultHandler for DropHandler {
    fn row(&mut self, _cols: RowDescription<'_>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.command = Some(complete.tag.to_string());
        Ok(())
    }
}

/// Rows and completion data of the final statement of a cycle.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Arc<[ColumnInfo]>,
    pub rows: Vec<Row>,
    /// Command tag, e.g. `SELECT 2` or `INSERT 0 1`
    pub command: Option<String>,
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    /// Decode every row into `T`.
    pub fn collect<T: FromRow>(&self) -> Result<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }

    /// Decode the first row into `T`, if any.
    pub fn first<T: FromRow>(&self) -> Result<Option<T>> {
        self.rows.first().map(T::from_row).transpose()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Handler that decodes every row through a [`TypeRegistry`].
///
/// Each statement replaces the previous one's result, so after a
/// multi-statement query the handler holds the final statement.
#[derive(Debug)]
pub struct CollectHandler {
    registry: Arc<TypeRegistry>,
    columns: Arc<[ColumnInfo]>,
    rows: Vec<Row>,
    command: Option<String>,
    in_result: bool,
}

impl CollectHandler {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            columns: Arc::from(Vec::new()),
            rows: Vec::new(),
            command: None,
            in_result: false,
        }
    }

    /// Finish collecting. `server_major` decides whether SELECT tags carry a count.
    pub fn into_result(self, server_major: Option<u32>) -> QueryResult {
        let rows_affected = self
            .command
            .as_deref()
            .and_then(|tag| rows_affected(tag, server_major));
        QueryResult {
            columns: self.columns,
            rows: self.rows,
            command: self.command,
            rows_affected,
        }
    }
}

impl ResultHandler for CollectHandler {
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        self.columns = cols.iter().map(ColumnInfo::from_field).collect();
        self.rows.clear();
        self.in_result = true;
        Ok(())
    }

    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        if row.len() != cols.len() {
            return Err(Error::Protocol(format!(
                "DataRow has {} columns, RowDescription has {}",
                row.len(),
                cols.len()
            )));
        }
        let mut values = Vec::with_capacity(row.len());
        for (field, data) in cols.iter().zip(row.iter()) {
            values.push(self.registry.decode(field.type_oid(), field.format(), data)?);
        }
        self.rows.push(Row::new(Arc::clone(&self.columns), values));
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        if !self.in_result {
            self.columns = Arc::from(Vec::new());
            self.rows.clear();
        }
        self.in_result = false;
        self.command = Some(complete.tag.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::backend::FieldDescriptionTail;
    use crate::protocol::types::{FormatCode, oid};
    use crate::types::Value;

    fn row_description(names: &[(&str, u32)]) -> Vec<u8> {
        let mut payload = (names.len() as i16).to_be_bytes().to_vec();
        for (name, type_oid) in names {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            let tail = FieldDescriptionTail::new(0, 0, *type_oid, -1, -1, FormatCode::Text);
            payload.extend_from_slice(zerocopy::IntoBytes::as_bytes(&tail));
        }
        payload
    }

    fn data_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut payload = (values.len() as i16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(v) => {
                    payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    payload.extend_from_slice(v.as_bytes());
                }
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        payload
    }

    #[test]
    fn collects_the_final_statement() {
        let mut handler = CollectHandler::new(Arc::new(TypeRegistry::new()));
        let desc = row_description(&[("id", oid::INT4), ("name", oid::TEXT)]);

        handler
            .result_start(RowDescription::parse(&desc).unwrap())
            .unwrap();
        let row = data_row(&[Some("1"), None]);
        handler
            .row(
                RowDescription::parse(&desc).unwrap(),
                DataRow::parse(&row).unwrap(),
            )
            .unwrap();
        handler
            .result_end(CommandComplete { tag: "SELECT 1" })
            .unwrap();

        let result = handler.into_result(Some(16));
        assert_eq!(result.rows_affected, Some(1));
        assert_eq!(result.rows[0].value(0), Some(&Value::Int4(1)));
        assert_eq!(result.rows[0].value(1), Some(&Value::Null));
        assert_eq!(result.columns[1].name, "name");
    }

    #[test]
    fn command_without_rows_resets_the_result() {
        let mut handler = CollectHandler::new(Arc::new(TypeRegistry::new()));
        let desc = row_description(&[("x", oid::INT4)]);
        handler
            .result_start(RowDescription::parse(&desc).unwrap())
            .unwrap();
        handler
            .result_end(CommandComplete { tag: "SELECT 0" })
            .unwrap();
        handler
            .result_end(CommandComplete { tag: "UPDATE 3" })
            .unwrap();

        let result = handler.into_result(None);
        assert!(result.columns.is_empty());
        assert_eq!(result.command.as_deref(), Some("UPDATE 3"));
        assert_eq!(result.rows_affected, Some(3));
    }

    #[test]
    fn row_width_must_match_the_description() {
        let mut handler = CollectHandler::new(Arc::new(TypeRegistry::new()));
        let desc = row_description(&[("a", oid::INT4), ("b", oid::INT4)]);
        handler
            .result_start(RowDescription::parse(&desc).unwrap())
            .unwrap();
        let row = data_row(&[Some("1")]);
        let err = handler
            .row(
                RowDescription::parse(&desc).unwrap(),
                DataRow::parse(&row).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    }
}
