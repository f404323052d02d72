//! SQL Identifier Sanitization Utilities
//!
//! Provides functions to safely quote SQL identifiers to prevent SQL injection.

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Arguments
/// * `identifier` - The identifier to quote
///
/// # Returns
/// The identifier wrapped in double quotes with escaped internal quotes
///
/// # Example
/// ```
/// use runtara_mapper::sql::quote_identifier;
///
/// let quoted = quote_identifier("my_table");
/// assert_eq!(quoted, "\"my_table\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    // Escape any double quotes in the identifier by doubling them
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a table name that may be schema-qualified (`schema.table`)
///
/// # Example
/// ```
/// use runtara_mapper::sql::quote_table_name;
///
/// assert_eq!(quote_table_name("audit.events"), "\"audit\".\"events\"");
/// assert_eq!(quote_table_name("users"), "\"users\"");
/// ```
pub fn quote_table_name(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_identifier(schema), quote_identifier(name)),
        None => quote_identifier(table),
    }
}
