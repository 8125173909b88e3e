//! Dynamically typed rows with O(1) positional and by-name access.
//!
//! Complements the static `FromRow` decode path in [`crate::conversion`]: a
//! caller that doesn't know the shape of a result set ahead of time can ask
//! for [`Record`]s instead of a concrete tuple/struct type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{DataRow, FieldDescription};
use crate::registry::{Overlay, Registry, Value};

/// Column name -> position map shared by every [`Record`] of one result set.
#[derive(Debug, PartialEq, Eq)]
pub struct ColumnIndex {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn from_fields(fields: &[FieldDescription<'_>]) -> Arc<Self> {
        Self::from_names(fields.iter().map(|f| f.name.to_string()).collect())
    }

    /// Build from already-owned column names (the common case: the caller read
    /// them once out of the `RowDescription` and wants to reuse the index
    /// across every row of the result set).
    pub fn from_names(names: Vec<String>) -> Arc<Self> {
        let by_name = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Arc::new(Self { names, by_name })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}

/// An immutable, decoded row: O(1) positional and by-name access, sharing its
/// column index with every other `Record` from the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    cols: Arc<ColumnIndex>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(cols: Arc<ColumnIndex>, values: Vec<Value>) -> Self {
        Self { cols, values }
    }

    /// Decode one `DataRow` against its `RowDescription`, using the given
    /// registry overlay to resolve each column's OID.
    pub fn decode(
        registry: &Registry,
        overlay: &Overlay,
        cols: Arc<ColumnIndex>,
        fields: &[FieldDescription<'_>],
        row: DataRow<'_>,
    ) -> Result<Self> {
        if fields.len() != cols.len() {
            return Err(Error::Protocol(
                "column index length does not match RowDescription".into(),
            ));
        }
        let mut values = Vec::with_capacity(fields.len());
        for (field, raw) in fields.iter().zip(row.iter()) {
            let value = registry.decode(overlay, field.type_oid(), field.format(), raw)?;
            values.push(value);
        }
        Ok(Self { cols, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get by position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.cols.position(name).and_then(|i| self.values.get(i))
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.cols.name(index)
    }

    /// Iterate `(column name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        (0..self.values.len()).map(move |i| (self.cols.name(i).unwrap_or(""), &self.values[i]))
    }
}

impl std::ops::Index<usize> for Record {
    type Output = Value;
    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl std::ops::Index<&str> for Record {
    type Output = Value;
    fn index(&self, name: &str) -> &Value {
        self.get_by_name(name)
            .unwrap_or_else(|| panic!("no such column: {name}"))
    }
}
