//! SQL utilities for the PostgreSQL driver
//!
//! Provides identifier quoting, condition compilation and statement building.

pub mod condition;
pub mod sanitize;
pub mod statement;

pub use condition::{
    SqlParam, build_condition_clause, build_order_by_clause, build_pagination_clause,
    build_where_clause,
};
pub use sanitize::{quote_identifier, quote_table_name};
pub use statement::Statement;
