//! Decoded rows and row-to-tuple conversion.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::state::extended::ColumnInfo;
use crate::types::{FromValue, Value};

/// A decoded row. Column metadata is shared by every row of a result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnInfo]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Convert the value at `index`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            Error::Decode(format!(
                "column index {} out of range for row of {} columns",
                index,
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Convert the value of the first column named `name`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::Decode(format!("no column named {:?}", name)))?;
        self.get(index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a whole [`Row`].
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.values.clone())
    }
}

macro_rules! impl_from_row_for_tuple {
    ($count:literal; $($idx:tt => $T:ident),+) => {
        impl<$($T: FromValue),+> FromRow for ($($T,)+) {
            fn from_row(row: &Row) -> Result<Self> {
                if row.len() != $count {
                    return Err(Error::Decode(format!(
                        "expected {} columns, row has {}",
                        $count,
                        row.len()
                    )));
                }
                Ok(($(row.get::<$T>($idx)?,)+))
            }
        }
    };
}

impl_from_row_for_tuple!(1; 0 => T1);
impl_from_row_for_tuple!(2; 0 => T1, 1 => T2);
impl_from_row_for_tuple!(3; 0 => T1, 1 => T2, 2 => T3);
impl_from_row_for_tuple!(4; 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_for_tuple!(5; 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_for_tuple!(6; 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_for_tuple!(7; 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_for_tuple!(8; 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
