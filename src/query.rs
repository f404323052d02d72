//! Ordering, pagination and projection options for finder queries
//!
//! Includes OrderBy, SelectOptions, ExtraOptions and the Query bundle handed
//! to drivers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::value::Value;

/// Extra option key carrying an index hint
pub const HINT_OPTION: &str = "hint";

/// Sort direction for a single field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    Asc(String),
    Desc(String),
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy::Asc(field.into())
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy::Desc(field.into())
    }

    pub fn field(&self) -> &str {
        match self {
            OrderBy::Asc(field) | OrderBy::Desc(field) => field,
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, OrderBy::Desc(_))
    }
}

/// Driver-specific options passed through untouched (e.g. an index hint)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraOptions(BTreeMap<String, Value>);

impl ExtraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Ask the driver to use a particular index
    pub fn hint(self, index: impl Into<String>) -> Self {
        self.with(HINT_OPTION, index.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pagination, projection and driver options for a find
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Number of matching rows to skip (`None`: no skip)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    /// Maximum number of rows to return (`None`: no limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Fields to return (`None`: all fields)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "ExtraOptions::is_empty")]
    pub extra: ExtraOptions,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set skip and limit together
    pub fn with_pagination(self, skip: u64, limit: u64) -> Self {
        self.with_skip(skip).with_limit(limit)
    }

    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_extra(mut self, extra: ExtraOptions) -> Self {
        self.extra = extra;
        self
    }
}

/// Everything a driver needs to run a find
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filter: Filter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderBy>,
    #[serde(default)]
    pub options: SelectOptions,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: Option<OrderBy>) -> Self {
        self.order = order;
        self
    }

    pub fn with_options(mut self, options: SelectOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter;

    #[test]
    fn test_select_options_default() {
        let options = SelectOptions::new();
        assert_eq!(options.skip, None);
        assert_eq!(options.limit, None);
        assert_eq!(options.fields, None);
        assert!(options.extra.is_empty());
    }

    #[test]
    fn test_select_options_builder() {
        let options = SelectOptions::new()
            .with_pagination(10, 5)
            .with_fields(["name", "age"])
            .with_extra(ExtraOptions::new().hint("users_age_idx"));

        assert_eq!(options.skip, Some(10));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.fields.as_deref(), Some(&["name".to_string(), "age".to_string()][..]));
        assert_eq!(
            options.extra.get(HINT_OPTION),
            Some(&Value::from("users_age_idx"))
        );
    }

    #[test]
    fn test_builder_returns_new_values() {
        let base = SelectOptions::new().with_limit(10);
        let paged = base.clone().with_skip(20);
        assert_eq!(base.skip, None);
        assert_eq!(paged.skip, Some(20));
        assert_eq!(paged.limit, Some(10));
    }

    #[test]
    fn test_order_by() {
        let order = OrderBy::desc("age");
        assert_eq!(order.field(), "age");
        assert!(order.is_descending());
        assert!(!OrderBy::asc("age").is_descending());
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new(filter::equals("active", true))
            .with_order(Some(OrderBy::asc("name")))
            .with_options(SelectOptions::new().with_limit(1));

        assert!(!query.filter.is_any());
        assert_eq!(query.order, Some(OrderBy::asc("name")));
        assert_eq!(query.options.limit, Some(1));
    }
}
