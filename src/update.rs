//! Update expressions: per-field "set" or "increment"

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{Number, Row, Value};

/// A single field update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOp {
    /// Replace the field with the literal value
    Set(Value),
    /// Add the amount to the field; a negative amount decrements
    Increment(Number),
}

/// Tagged "set" update
pub fn set(value: impl Into<Value>) -> UpdateOp {
    UpdateOp::Set(value.into())
}

/// Tagged "increment" update
pub fn increment(amount: impl Into<Number>) -> UpdateOp {
    UpdateOp::Increment(amount.into())
}

impl From<Value> for UpdateOp {
    fn from(value: Value) -> Self {
        UpdateOp::Set(value)
    }
}

/// Mapping from field name to update operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update {
    fields: BTreeMap<String, UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation for a field, replacing any earlier one
    pub fn with(mut self, field: impl Into<String>, op: UpdateOp) -> Self {
        self.fields.insert(field.into(), op);
        self
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, set(value))
    }

    pub fn increment(self, field: impl Into<String>, amount: impl Into<Number>) -> Self {
        self.with(field, increment(amount))
    }

    pub fn get(&self, field: &str) -> Option<&UpdateOp> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UpdateOp)> {
        self.fields.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply every operation to a row. The row is left untouched if any
    /// operation fails.
    pub fn apply(&self, row: &mut Row) -> crate::Result<()> {
        let mut updated = row.clone();
        for (field, op) in &self.fields {
            let next = match op {
                UpdateOp::Set(value) => value.clone(),
                UpdateOp::Increment(amount) => {
                    let current = updated.get(field).unwrap_or(&Value::Null);
                    amount.apply_to(current).map_err(|msg| {
                        crate::MapperError::invalid_update(format!("field '{field}': {msg}"))
                    })?
                }
            };
            updated.insert(field.clone(), next);
        }
        *row = updated;
        Ok(())
    }
}

/// Bare values in a row are "set" updates
impl From<Row> for Update {
    fn from(row: Row) -> Self {
        Self {
            fields: row.into_iter().map(|(k, v)| (k, UpdateOp::Set(v))).collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, UpdateOp)> for Update {
    fn from_iter<I: IntoIterator<Item = (K, UpdateOp)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, op)| (k.into(), op)).collect(),
        }
    }
}
