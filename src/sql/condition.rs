//! Condition building for SQL WHERE clauses
//!
//! Converts filter expressions to parameterised PostgreSQL conditions.
//! Columns are compared through `to_jsonb` so that values of any JSON kind
//! can be bound as a single `jsonb` parameter.

use chrono::{DateTime, Utc};

use crate::filter::{CompareOp, Expression, Filter};
use crate::query::OrderBy;
use crate::sql::sanitize::quote_identifier;
use crate::value::{Number, Value};

/// A bind parameter produced while compiling a condition
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Json(serde_json::Value),
    Text(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl From<Number> for SqlParam {
    fn from(number: Number) -> Self {
        match number {
            Number::Int(i) => SqlParam::Int(i),
            Number::Float(f) => SqlParam::Float(f),
        }
    }
}

impl SqlParam {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Date(date) => SqlParam::Timestamp(*date),
            other => SqlParam::Json(other.to_json()),
        }
    }
}

/// Build a SQL WHERE clause from a filter
///
/// Returns (clause, params) tuple where:
/// - `clause` is the SQL condition with parameter placeholders ($1, $2, etc.)
/// - `params` is the list of values to bind, in placeholder order
///
/// `param_offset` is the first placeholder number to use; on return it holds
/// the next free one. An `any()` filter yields `TRUE`.
pub fn build_where_clause(
    filter: &Filter,
    param_offset: &mut usize,
) -> Result<(String, Vec<SqlParam>), String> {
    match filter.root() {
        Some(expr) => build_condition_clause(expr, param_offset),
        None => Ok(("TRUE".to_string(), Vec::new())),
    }
}

/// Build a SQL condition from a single expression
///
/// # Supported Expressions
/// - Logical: And, Or, Not (empty And is `TRUE`, empty Or is `FALSE`)
/// - Comparison: Eq, Ne, Gt, Gte, Lt, Lte
/// - Nullability: Exists
/// - Membership: In
/// - Pattern: Regex (PostgreSQL `~` / `~*`)
/// - Custom: raw SQL inlined verbatim
pub fn build_condition_clause(
    expr: &Expression,
    param_offset: &mut usize,
) -> Result<(String, Vec<SqlParam>), String> {
    let mut params = Vec::new();

    match expr {
        Expression::And { children } | Expression::Or { children } => {
            let (joiner, empty) = match expr {
                Expression::And { .. } => (" AND ", "TRUE"),
                _ => (" OR ", "FALSE"),
            };
            if children.is_empty() {
                return Ok((empty.to_string(), params));
            }
            let mut clauses = Vec::with_capacity(children.len());
            for child in children {
                let (clause, mut sub_params) = build_condition_clause(child, param_offset)?;
                clauses.push(format!("({})", clause));
                params.append(&mut sub_params);
            }
            Ok((clauses.join(joiner), params))
        }
        Expression::Not { child } => {
            let (clause, sub_params) = build_condition_clause(child, param_offset)?;
            params.extend(sub_params);
            // an unknown child counts as false, as it does in process
            Ok((format!("NOT COALESCE(({}), FALSE)", clause), params))
        }
        Expression::Compare { op, key, value } => {
            let column = quote_identifier(key);

            // NULL only makes sense for equality
            if value.is_null() {
                let null_operator = match op {
                    CompareOp::Eq => "IS NULL",
                    CompareOp::Ne => "IS NOT NULL",
                    _ => {
                        return Err(format!(
                            "'{}' comparison with null is not supported for field '{}'",
                            op.as_str(),
                            key
                        ));
                    }
                };
                return Ok((format!("{} {}", column, null_operator), params));
            }

            let param = SqlParam::from_value(value);
            let clause = match (&param, op) {
                (SqlParam::Timestamp(_), CompareOp::Ne) => {
                    format!("{} IS DISTINCT FROM ${}::timestamptz", column, param_offset)
                }
                (SqlParam::Timestamp(_), _) => {
                    format!("{} {} ${}::timestamptz", column, sql_operator(*op), param_offset)
                }
                (_, CompareOp::Ne) => {
                    format!("to_jsonb({}) IS DISTINCT FROM ${}::jsonb", column, param_offset)
                }
                _ => format!(
                    "to_jsonb({}) {} ${}::jsonb",
                    column,
                    sql_operator(*op),
                    param_offset
                ),
            };
            params.push(param);
            *param_offset += 1;

            Ok((clause, params))
        }
        Expression::Exists { key, exists } => {
            let null_operator = if *exists { "IS NOT NULL" } else { "IS NULL" };
            Ok((format!("{} {}", quote_identifier(key), null_operator), params))
        }
        Expression::In { key, values } => {
            if values.is_empty() {
                return Ok(("FALSE".to_string(), params));
            }
            let list = serde_json::Value::Array(values.iter().map(Value::to_json).collect());
            params.push(SqlParam::Json(list));

            let clause = format!(
                "COALESCE(to_jsonb({}), 'null'::jsonb) IN (SELECT jsonb_array_elements(${}::jsonb))",
                quote_identifier(key),
                param_offset
            );
            *param_offset += 1;

            Ok((clause, params))
        }
        Expression::Regex {
            key,
            pattern,
            ignore_case,
        } => {
            let column = quote_identifier(key);
            let operator = if *ignore_case { "~*" } else { "~" };
            params.push(SqlParam::Text(pattern.clone()));

            let clause = format!(
                "(jsonb_typeof(to_jsonb({})) = 'string' AND {}::text {} ${})",
                column, column, operator, param_offset
            );
            *param_offset += 1;

            Ok((clause, params))
        }
        Expression::Custom { raw } => {
            if raw.trim().is_empty() {
                return Err("custom expression is empty".to_string());
            }
            Ok((format!("({})", raw), params))
        }
    }
}

fn sql_operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
    }
}

/// Build ORDER BY clause, including the keywords
///
/// Without an explicit order rows come back in `ctid` order, which is stable
/// for an unchanged table.
pub fn build_order_by_clause(order: Option<&OrderBy>) -> String {
    match order {
        Some(order) if order.is_descending() => {
            format!(" ORDER BY {} DESC NULLS LAST", quote_identifier(order.field()))
        }
        Some(order) => format!(" ORDER BY {} ASC NULLS FIRST", quote_identifier(order.field())),
        None => " ORDER BY ctid".to_string(),
    }
}

/// Build the LIMIT/OFFSET tail. Values are inlined since they are integers.
pub fn build_pagination_clause(skip: Option<u64>, limit: Option<u64>) -> String {
    let mut clause = String::new();
    if let Some(limit) = limit {
        clause.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(skip) = skip.filter(|s| *s > 0) {
        clause.push_str(&format!(" OFFSET {}", skip));
    }
    clause
}
