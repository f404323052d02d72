//! In-process filter evaluation
//!
//! Compiles a [`Filter`] once per query (regexes included) and evaluates it
//! against rows. Logical nodes short-circuit left to right.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};

use crate::error::{MapperError, Result};
use crate::filter::{CompareOp, Expression, Filter};
use crate::value::{Row, Value, deep_equals};

#[derive(Debug)]
enum Node {
    Compare {
        op: CompareOp,
        key: String,
        value: Value,
    },
    Exists {
        key: String,
        exists: bool,
    },
    In {
        key: String,
        values: Vec<Value>,
    },
    Regex {
        key: String,
        regex: Regex,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

/// A filter ready to be evaluated against rows
#[derive(Debug)]
pub struct CompiledFilter {
    root: Option<Node>,
}

impl CompiledFilter {
    /// Fails on invalid regex patterns and on `Custom` expressions, which have
    /// no in-process meaning.
    pub fn compile(filter: &Filter) -> Result<Self> {
        let root = filter.root().map(compile_node).transpose()?;
        Ok(Self { root })
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.root.as_ref().is_none_or(|node| eval(node, row))
    }
}

fn compile_node(expr: &Expression) -> Result<Node> {
    Ok(match expr {
        Expression::Compare { op, key, value } => Node::Compare {
            op: *op,
            key: key.clone(),
            value: value.clone(),
        },
        Expression::Exists { key, exists } => Node::Exists {
            key: key.clone(),
            exists: *exists,
        },
        Expression::In { key, values } => Node::In {
            key: key.clone(),
            values: values.clone(),
        },
        Expression::Regex {
            key,
            pattern,
            ignore_case,
        } => {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(*ignore_case)
                .build()
                .map_err(|e| {
                    MapperError::invalid_condition(format!("invalid pattern for '{key}': {e}"))
                })?;
            Node::Regex {
                key: key.clone(),
                regex,
            }
        }
        Expression::And { children } => {
            Node::And(children.iter().map(compile_node).collect::<Result<_>>()?)
        }
        Expression::Or { children } => {
            Node::Or(children.iter().map(compile_node).collect::<Result<_>>()?)
        }
        Expression::Not { child } => Node::Not(Box::new(compile_node(child)?)),
        Expression::Custom { raw } => {
            return Err(MapperError::unsupported(format!(
                "custom expression cannot be evaluated in process: {raw}"
            )));
        }
    })
}

fn field<'r>(row: &'r Row, key: &str) -> &'r Value {
    row.get(key).unwrap_or(&Value::Null)
}

fn eval(node: &Node, row: &Row) -> bool {
    match node {
        Node::Compare { op, key, value } => {
            let actual = field(row, key);
            match op {
                CompareOp::Eq => deep_equals(actual, value),
                CompareOp::Ne => !deep_equals(actual, value),
                CompareOp::Gt => actual.compare(value) == Some(Ordering::Greater),
                CompareOp::Gte => matches!(
                    actual.compare(value),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                CompareOp::Lt => actual.compare(value) == Some(Ordering::Less),
                CompareOp::Lte => matches!(
                    actual.compare(value),
                    Some(Ordering::Less | Ordering::Equal)
                ),
            }
        }
        Node::Exists { key, exists } => !field(row, key).is_null() == *exists,
        Node::In { key, values } => {
            let actual = field(row, key);
            values.iter().any(|candidate| deep_equals(actual, candidate))
        }
        Node::Regex { key, regex } => field(row, key)
            .as_str()
            .is_some_and(|text| regex.is_match(text)),
        Node::And(children) => children.iter().all(|child| eval(child, row)),
        Node::Or(children) => children.iter().any(|child| eval(child, row)),
        Node::Not(child) => !eval(child, row),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Date(_) => 4,
        Value::List(_) => 5,
        Value::Map(_) => 6,
    }
}

/// Total order used for sorting: nulls first, then by kind, then by value
pub fn sort_order(a: &Value, b: &Value) -> Ordering {
    if let Some(ordering) = a.compare(b) {
        return ordering;
    }
    match (a.as_f64(), b.as_f64()) {
        // NaN sorts above every other number
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter;

    fn person(name: &str, age: Option<i64>) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::from(name));
        row.insert("age".into(), Value::from(age));
        row
    }

    fn matches(filter: Filter, row: &Row) -> bool {
        CompiledFilter::compile(&filter).unwrap().matches(row)
    }

    #[test]
    fn test_any_matches_everything() {
        assert!(matches(filter::any(), &Row::new()));
    }

    #[test]
    fn test_comparisons() {
        let row = person("Ann", Some(30));
        assert!(matches(filter::equals("age", 30), &row));
        assert!(matches(filter::equals("age", 30.0), &row));
        assert!(matches(filter::not_equals("age", 31), &row));
        assert!(matches(filter::greater_than("age", 20), &row));
        assert!(!matches(filter::greater_than("age", 30), &row));
        assert!(matches(filter::greater_than_or_equal("age", 30), &row));
        assert!(matches(filter::less_than("age", 31), &row));
        assert!(matches(filter::less_than_or_equal("age", 30), &row));
    }

    #[test]
    fn test_null_handling() {
        let row = person("Ann", None);
        assert!(matches(filter::is_null("age"), &row));
        assert!(matches(filter::is_null("missing"), &row));
        assert!(!matches(filter::is_not_null("age"), &row));
        assert!(!matches(filter::greater_than("age", 0), &row));
        assert!(matches(filter::not_equals("age", 1), &row));
        assert!(matches(filter::equals("age", Value::Null), &row));
    }

    #[test]
    fn test_in() {
        let row = person("Ann", Some(30));
        assert!(matches(filter::is_in("age", [10, 30]), &row));
        assert!(!matches(filter::is_in("age", [10, 20]), &row));
        assert!(matches(filter::not_in("name", ["Bob"]), &row));
    }

    #[test]
    fn test_string_matching() {
        let row = person("Anna.Smith", Some(30));
        assert!(matches(filter::starts_with("name", "anna", true), &row));
        assert!(!matches(filter::starts_with("name", "anna", false), &row));
        assert!(matches(filter::ends_with("name", ".Smith", false), &row));
        assert!(matches(filter::contains("name", "a.S", false), &row));
        // the dot is literal
        assert!(!matches(filter::contains("name", "a.S", false), &person("AnnaXSmith", None)));
        assert!(!matches(filter::contains("age", "3", false), &row));
    }

    #[test]
    fn test_logic() {
        let row = person("Ann", Some(30));
        assert!(matches(
            filter::and([filter::equals("name", "Ann"), filter::greater_than("age", 18)]),
            &row
        ));
        assert!(!matches(
            filter::and([filter::equals("name", "Ann"), filter::greater_than("age", 40)]),
            &row
        ));
        assert!(matches(
            filter::or([filter::equals("name", "Bob"), filter::equals("age", 30)]),
            &row
        ));
        assert!(matches(filter::not(filter::equals("name", "Bob")), &row));
        assert!(!matches(filter::not(filter::any()), &row));
    }

    #[test]
    fn test_custom_is_unsupported() {
        let err = CompiledFilter::compile(&filter::custom("age > 3")).unwrap_err();
        assert!(err.is_driver_failure());
    }

    #[test]
    fn test_sort_order_puts_nulls_first() {
        let mut values = vec![Value::Int(3), Value::Null, Value::Float(1.5), Value::from("a")];
        values.sort_by(sort_order);
        assert_eq!(
            values,
            vec![Value::Null, Value::Float(1.5), Value::Int(3), Value::from("a")]
        );
    }

    #[test]
    fn test_sort_order_places_nan_after_numbers() {
        let mut values = vec![
            Value::Float(f64::NAN),
            Value::Int(2),
            Value::Null,
            Value::Float(f64::NAN),
            Value::Float(-1.0),
            Value::from("z"),
        ];
        values.sort_by(sort_order);
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Float(-1.0));
        assert_eq!(values[2], Value::Int(2));
        assert!(values[3].as_f64().is_some_and(f64::is_nan));
        assert!(values[4].as_f64().is_some_and(f64::is_nan));
        assert_eq!(values[5], Value::from("z"));

        assert_eq!(sort_order(&Value::Float(f64::NAN), &Value::Int(7)), Ordering::Greater);
        assert_eq!(sort_order(&Value::Int(7), &Value::Float(f64::NAN)), Ordering::Less);
    }
}
