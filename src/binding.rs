//! Table bindings shared by finders and trackers

use crate::error::{MapperError, Result};

/// Where an entity type lives: source name, table and optional primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    source: String,
    table: String,
    primary_key: Option<String>,
}

impl TableBinding {
    pub fn new(source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            table: table.into(),
            primary_key: None,
        }
    }

    /// Set the primary key field. An empty name leaves the table keyless.
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.primary_key = (!field.is_empty()).then_some(field);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// The primary key field, or `NoPrimaryKey` for keyless tables
    pub fn require_primary_key(&self) -> Result<&str> {
        self.primary_key()
            .ok_or_else(|| MapperError::no_primary_key(&self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_accessors() {
        let binding = TableBinding::new("main", "users").with_primary_key("id");
        assert_eq!(binding.source(), "main");
        assert_eq!(binding.table(), "users");
        assert_eq!(binding.primary_key(), Some("id"));
        assert_eq!(binding.require_primary_key().unwrap(), "id");
    }

    #[test]
    fn test_keyless_binding() {
        let binding = TableBinding::new("main", "logs");
        assert!(matches!(
            binding.require_primary_key(),
            Err(MapperError::NoPrimaryKey(table)) if table == "logs"
        ));
    }

    #[test]
    fn test_empty_primary_key_is_none() {
        let binding = TableBinding::new("main", "logs").with_primary_key("");
        assert_eq!(binding.primary_key(), None);
    }
}
