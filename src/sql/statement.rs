//! Statement building for the PostgreSQL driver
//!
//! Rows travel as a single `jsonb` document. Reads return `to_jsonb(t)` and
//! writes decode the document with `jsonb_populate_record`, so column types
//! are resolved by PostgreSQL rather than guessed on the client.

use std::collections::BTreeSet;

use crate::filter::{Expression, Filter};
use crate::query::Query;
use crate::sql::condition::{
    SqlParam, build_condition_clause, build_order_by_clause, build_pagination_clause,
    build_where_clause,
};
use crate::sql::sanitize::{quote_identifier, quote_table_name};
use crate::update::{Update, UpdateOp};
use crate::value::{Row, Value, row_to_json};

/// A SQL statement together with its bind parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn key_condition(
    key_field: &str,
    key: &Value,
    param_offset: &mut usize,
) -> Result<(String, Vec<SqlParam>), String> {
    build_condition_clause(
        &Expression::Compare {
            op: crate::filter::CompareOp::Eq,
            key: key_field.to_string(),
            value: key.clone(),
        },
        param_offset,
    )
}

impl Statement {
    /// `SELECT` returning one `jsonb` document per row in a column named `row`
    pub fn select(table: &str, query: &Query) -> Result<Self, String> {
        let projection = match &query.options.fields {
            None => "to_jsonb(t)".to_string(),
            Some(fields) if fields.is_empty() => "'{}'::jsonb".to_string(),
            Some(fields) => {
                let pairs: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}, t.{}", quote_literal(f), quote_identifier(f)))
                    .collect();
                format!("jsonb_build_object({})", pairs.join(", "))
            }
        };

        let mut param_offset = 1;
        let (where_clause, params) = build_where_clause(&query.filter, &mut param_offset)?;

        Ok(Self {
            sql: format!(
                "SELECT {} AS row FROM {} AS t WHERE {}{}{}",
                projection,
                quote_table_name(table),
                where_clause,
                build_order_by_clause(query.order.as_ref()),
                build_pagination_clause(query.options.skip, query.options.limit)
            ),
            params,
        })
    }

    pub fn select_by_key(table: &str, key_field: &str, key: &Value) -> Result<Self, String> {
        let mut param_offset = 1;
        let (where_clause, params) = key_condition(key_field, key, &mut param_offset)?;
        Ok(Self {
            sql: format!(
                "SELECT to_jsonb(t) AS row FROM {} AS t WHERE {} LIMIT 1",
                quote_table_name(table),
                where_clause
            ),
            params,
        })
    }

    pub fn count(table: &str, filter: &Filter) -> Result<Self, String> {
        let mut param_offset = 1;
        let (where_clause, params) = build_where_clause(filter, &mut param_offset)?;
        Ok(Self {
            sql: format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                quote_table_name(table),
                where_clause
            ),
            params,
        })
    }

    pub fn sum(table: &str, filter: &Filter, field: &str) -> Result<Self, String> {
        let mut param_offset = 1;
        let (where_clause, params) = build_where_clause(filter, &mut param_offset)?;
        Ok(Self {
            sql: format!(
                "SELECT COALESCE(SUM({}), 0)::float8 FROM {} WHERE {}",
                quote_identifier(field),
                quote_table_name(table),
                where_clause
            ),
            params,
        })
    }

    /// Single-row insert. A null or absent key column is left to the column
    /// default and returned through `RETURNING`.
    pub fn insert(table: &str, row: &Row, key_field: Option<&str>) -> Self {
        let columns: Vec<&String> = row
            .iter()
            .filter(|(name, value)| !(Some(name.as_str()) == key_field && value.is_null()))
            .map(|(name, _)| name)
            .collect();
        let returning = key_field
            .map(|k| format!(" RETURNING to_jsonb({}) AS key", quote_identifier(k)))
            .unwrap_or_default();
        let table_sql = quote_table_name(table);

        if columns.is_empty() {
            return Self {
                sql: format!("INSERT INTO {} DEFAULT VALUES{}", table_sql, returning),
                params: Vec::new(),
            };
        }

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            sql: format!(
                "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1::jsonb){returning}",
                table = table_sql,
                cols = column_list,
                returning = returning,
            ),
            params: vec![SqlParam::Json(row_to_json(row))],
        }
    }

    /// Multi-row insert in one statement. Columns null in every row are
    /// omitted so their defaults apply.
    pub fn batch_insert(table: &str, rows: &[Row]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let columns: BTreeSet<&String> = rows
            .iter()
            .flat_map(|row| row.iter().filter(|(_, v)| !v.is_null()).map(|(k, _)| k))
            .collect();

        let table_sql = quote_table_name(table);
        if columns.is_empty() {
            // zero supplied columns: every column takes its default
            return Some(Self {
                sql: format!(
                    "INSERT INTO {} SELECT FROM generate_series(1, {})",
                    table_sql,
                    rows.len()
                ),
                params: Vec::new(),
            });
        }

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let documents = serde_json::Value::Array(rows.iter().map(row_to_json).collect());
        Some(Self {
            sql: format!(
                "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_recordset(NULL::{table}, $1::jsonb)",
                table = table_sql,
                cols = column_list,
            ),
            params: vec![SqlParam::Json(documents)],
        })
    }

    /// `UPDATE` of every row matching `filter`. Returns `None` for an empty
    /// update, which has nothing to execute.
    pub fn update(table: &str, filter: &Filter, changes: &Update) -> Result<Option<Self>, String> {
        let table_sql = quote_table_name(table);
        let mut param_offset = 1;
        let mut params = Vec::new();
        let mut assignments = Vec::new();

        let literals: Row = changes
            .iter()
            .filter_map(|(field, op)| match op {
                UpdateOp::Set(value) => Some((field.clone(), value.clone())),
                UpdateOp::Increment(_) => None,
            })
            .collect();
        if !literals.is_empty() {
            let record_param = param_offset;
            params.push(SqlParam::Json(row_to_json(&literals)));
            param_offset += 1;
            for field in literals.keys() {
                let column = quote_identifier(field);
                assignments.push(format!(
                    "{col} = (SELECT {col} FROM jsonb_populate_record(NULL::{table}, ${n}::jsonb))",
                    col = column,
                    table = table_sql,
                    n = record_param,
                ));
            }
        }

        for (field, op) in changes.iter() {
            if let UpdateOp::Increment(amount) = op {
                let column = quote_identifier(field);
                assignments.push(format!(
                    "{col} = COALESCE({col}, 0) + ${n}",
                    col = column,
                    n = param_offset
                ));
                params.push(SqlParam::from(*amount));
                param_offset += 1;
            }
        }

        if assignments.is_empty() {
            return Ok(None);
        }

        let (where_clause, mut where_params) = build_where_clause(filter, &mut param_offset)?;
        params.append(&mut where_params);

        Ok(Some(Self {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                table_sql,
                assignments.join(", "),
                where_clause
            ),
            params,
        }))
    }

    pub fn delete(table: &str, filter: &Filter) -> Result<Self, String> {
        let mut param_offset = 1;
        let (where_clause, params) = build_where_clause(filter, &mut param_offset)?;
        Ok(Self {
            sql: format!("DELETE FROM {} WHERE {}", quote_table_name(table), where_clause),
            params,
        })
    }
}
