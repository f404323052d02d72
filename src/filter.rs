//! Portable filter expressions
//!
//! A [`Filter`] is an immutable predicate tree describing a WHERE-like
//! condition independently of any storage query language. Building one never
//! touches storage; evaluating it is the driver's job.
//!
//! ```rust
//! use runtara_mapper::filter;
//!
//! let adults_named_a = filter::and([
//!     filter::greater_than_or_equal("age", 18),
//!     filter::starts_with("name", "a", true),
//! ]);
//! assert!(!adults_named_a.is_any());
//! ```

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operator of a [`Expression::Compare`] node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
        }
    }
}

/// A node of the predicate tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expression {
    Compare {
        op: CompareOp,
        key: String,
        value: Value,
    },
    /// True when the field is present and non-null (`exists`), or absent/null (`!exists`)
    Exists { key: String, exists: bool },
    In { key: String, values: Vec<Value> },
    /// `pattern` is a regular expression whose literal parts are already escaped
    Regex {
        key: String,
        pattern: String,
        ignore_case: bool,
    },
    /// Children are evaluated left to right; the first false child wins
    And { children: Vec<Expression> },
    /// Children are evaluated left to right; the first true child wins
    Or { children: Vec<Expression> },
    Not { child: Box<Expression> },
    /// Driver-specific raw expression, passed through without validation
    Custom { raw: String },
}

/// A filter: either "no condition" or a predicate tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<Expression>,
}

impl Filter {
    pub fn new(root: Expression) -> Self {
        Self { root: Some(root) }
    }

    /// The root node, `None` when the filter matches every row
    pub fn root(&self) -> Option<&Expression> {
        self.root.as_ref()
    }

    pub fn into_root(self) -> Option<Expression> {
        self.root
    }

    pub fn is_any(&self) -> bool {
        self.root.is_none()
    }

    /// `self AND other`
    pub fn and(self, other: Filter) -> Filter {
        and([self, other])
    }

    /// `self OR other`
    pub fn or(self, other: Filter) -> Filter {
        or([self, other])
    }

    /// `NOT self`
    pub fn negate(self) -> Filter {
        not(self)
    }
}

impl From<Expression> for Filter {
    fn from(expr: Expression) -> Self {
        Filter::new(expr)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// The empty filter: matches every row
pub fn any() -> Filter {
    Filter::default()
}

fn compare(op: CompareOp, key: impl Into<String>, value: impl Into<Value>) -> Filter {
    Filter::new(Expression::Compare {
        op,
        key: key.into(),
        value: value.into(),
    })
}

pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Filter {
    compare(CompareOp::Eq, key, value)
}

pub fn not_equals(key: impl Into<String>, value: impl Into<Value>) -> Filter {
    compare(CompareOp::Ne, key, value)
}

pub fn greater_than(key: impl Into<String>, value: impl Into<Value>) -> Filter {
    compare(CompareOp::Gt, key, value)
}

pub fn greater_than_or_equal(key: impl Into<String>, value: impl Into<Value>) -> Filter {
    compare(CompareOp::Gte, key, value)
}

pub fn less_than(key: impl Into<String>, value: impl Into<Value>) -> Filter {
    compare(CompareOp::Lt, key, value)
}

pub fn less_than_or_equal(key: impl Into<String>, value: impl Into<Value>) -> Filter {
    compare(CompareOp::Lte, key, value)
}

pub fn is_null(key: impl Into<String>) -> Filter {
    Filter::new(Expression::Exists {
        key: key.into(),
        exists: false,
    })
}

pub fn is_not_null(key: impl Into<String>) -> Filter {
    Filter::new(Expression::Exists {
        key: key.into(),
        exists: true,
    })
}

pub fn is_in<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::new(Expression::In {
        key: key.into(),
        values: values.into_iter().map(Into::into).collect(),
    })
}

pub fn not_in<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    not(is_in(key, values))
}

fn regex(key: impl Into<String>, pattern: String, ignore_case: bool) -> Filter {
    Filter::new(Expression::Regex {
        key: key.into(),
        pattern,
        ignore_case,
    })
}

pub fn starts_with(key: impl Into<String>, literal: &str, ignore_case: bool) -> Filter {
    regex(key, format!("^{}", escape_pattern(literal)), ignore_case)
}

pub fn ends_with(key: impl Into<String>, literal: &str, ignore_case: bool) -> Filter {
    regex(key, format!("{}$", escape_pattern(literal)), ignore_case)
}

pub fn contains(key: impl Into<String>, literal: &str, ignore_case: bool) -> Filter {
    regex(key, escape_pattern(literal), ignore_case)
}

/// Conjunction. `any()` children are dropped, nested conjunctions are
/// flattened in place and a single remaining child is returned as is.
pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let mut children = Vec::new();
    for filter in filters {
        match filter.root {
            None => {}
            Some(Expression::And { children: nested }) if !nested.is_empty() => {
                children.extend(nested)
            }
            Some(expr) => children.push(expr),
        }
    }
    collapse(children, |children| Expression::And { children })
}

/// Disjunction. An `any()` child makes the whole disjunction `any()`.
pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let mut children = Vec::new();
    for filter in filters {
        match filter.root {
            None => return any(),
            Some(Expression::Or { children: nested }) if !nested.is_empty() => {
                children.extend(nested)
            }
            Some(expr) => children.push(expr),
        }
    }
    collapse(children, |children| Expression::Or { children })
}

fn collapse(mut children: Vec<Expression>, wrap: fn(Vec<Expression>) -> Expression) -> Filter {
    match children.len() {
        0 => any(),
        1 => Filter::new(children.remove(0)),
        _ => Filter::new(wrap(children)),
    }
}

/// Negation. `not(any())` matches no row.
pub fn not(filter: Filter) -> Filter {
    let child = filter
        .root
        .unwrap_or(Expression::And { children: Vec::new() });
    Filter::new(Expression::Not {
        child: Box::new(child),
    })
}

/// Inject a raw driver-specific expression
pub fn custom(raw: impl Into<String>) -> Filter {
    Filter::new(Expression::Custom { raw: raw.into() })
}

/// Escape every regular-expression metacharacter in `literal`.
///
/// Punctuation is backslash-escaped; commas and whitespace become four-digit
/// `\u` escapes, which both the Rust and PostgreSQL regex dialects accept.
pub fn escape_pattern(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len() * 2);
    for c in literal.chars() {
        match c {
            '-' | '[' | ']' | '{' | '}' | '(' | ')' | '*' | '+' | '?' | '.' | '\\' | '^' | '$'
            | '|' | '#' => {
                escaped.push('\\');
                escaped.push(c);
            }
            ',' => escaped.push_str("\\u002c"),
            c if c.is_whitespace() => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}
