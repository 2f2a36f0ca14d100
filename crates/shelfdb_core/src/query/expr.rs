//! Query compilation.

use crate::error::{CoreError, CoreResult};
use regex::Regex;
use shelfdb_codec::Value;
use std::collections::BTreeSet;

/// Comparison applied by [`Expr::Range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$ne`
    Ne,
}

impl RangeOp {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$ne" => Some(Self::Ne),
            _ => None,
        }
    }

    /// Returns true if `value` compares true against `bound`.
    ///
    /// Values of different kinds never compare true, except under `$ne`.
    #[must_use]
    pub fn accepts(self, value: &Value, bound: &Value) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match (self, value.compare(bound)) {
            (Self::Gt, Some(Greater))
            | (Self::Gte, Some(Greater | Equal))
            | (Self::Lt, Some(Less))
            | (Self::Lte, Some(Less | Equal)) => true,
            (Self::Ne, _) => value != bound,
            _ => false,
        }
    }
}

/// A compiled query.
///
/// Built once by [`Expr::compile`] and evaluated twice: first
/// [`Expr::fields`] names the indexes the query needs, then
/// [`Expr::evaluate`] runs against them.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Field equals value (or, for sequences, contains it).
    Equality {
        /// Dotted path.
        field: String,
        /// Value to match.
        value: Value,
    },
    /// Intersection of the children; empty means every document.
    And(Vec<Expr>),
    /// Union of the children.
    Or(Vec<Expr>),
    /// Complement of the child within the collection.
    Not(Box<Expr>),
    /// Ordered comparison against a bound.
    Range {
        /// Dotted path.
        field: String,
        /// Comparison.
        op: RangeOp,
        /// Bound to compare against.
        bound: Value,
    },
    /// Field equals any of the values.
    In {
        /// Dotted path.
        field: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// Field holds every one of the values.
    All {
        /// Dotted path.
        field: String,
        /// Required values.
        values: Vec<Value>,
    },
    /// Field is present (or absent).
    Exists {
        /// Dotted path.
        field: String,
        /// Whether the field must be present.
        present: bool,
    },
    /// Text field matches a regular expression.
    Regex {
        /// Dotted path.
        field: String,
        /// Compiled pattern.
        pattern: Regex,
    },
}

impl Expr {
    /// Compiles a query mapping.
    ///
    /// Top-level keys are field paths or `$and`, `$or`, `$not`. Several
    /// keys combine with AND. A field mapped to a mapping whose keys are all
    /// operator tokens is an operator expression; any other value is an
    /// equality test.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedQuery`] for a non-mapping query, an
    /// unknown operator, an operator argument of the wrong shape, an
    /// invalid regular expression, or an empty path segment.
    pub fn compile(query: &Value) -> CoreResult<Self> {
        let map = query
            .as_map()
            .ok_or_else(|| CoreError::malformed_query(format!("query must be a mapping, got {query}")))?;

        let mut terms = Vec::with_capacity(map.len());
        for (key, arg) in map {
            let term = match key.as_str() {
                "$and" => Self::And(Self::compile_list(key, arg, Self::compile)?),
                "$or" => Self::Or(Self::compile_list(key, arg, Self::compile)?),
                "$not" => Self::Not(Box::new(Self::compile(arg)?)),
                op if op.starts_with('$') => {
                    return Err(CoreError::malformed_query(format!(
                        "operator {op} needs a field"
                    )))
                }
                field => Self::compile_field(field, arg)?,
            };
            terms.push(term);
        }
        Ok(Self::conjunction(terms))
    }

    fn compile_field(field: &str, arg: &Value) -> CoreResult<Self> {
        if field.is_empty() || field.split('.').any(str::is_empty) {
            return Err(CoreError::malformed_query(format!(
                "invalid field path {field:?}"
            )));
        }

        let operators = match arg.as_map() {
            Some(map) if map.keys().any(|k| k.starts_with('$')) => map,
            _ => {
                return Ok(Self::Equality {
                    field: field.to_string(),
                    value: arg.clone(),
                })
            }
        };
        if let Some(plain) = operators.keys().find(|k| !k.starts_with('$')) {
            return Err(CoreError::malformed_query(format!(
                "field {field:?} mixes operators with plain key {plain:?}"
            )));
        }

        let mut terms = Vec::with_capacity(operators.len());
        for (op, operand) in operators {
            terms.push(Self::compile_operator(field, op, operand)?);
        }
        Ok(Self::conjunction(terms))
    }

    fn compile_operator(field: &str, op: &str, arg: &Value) -> CoreResult<Self> {
        if let Some(range) = RangeOp::from_token(op) {
            return Ok(Self::Range {
                field: field.to_string(),
                op: range,
                bound: arg.clone(),
            });
        }
        let field_expr = |arg: &Value| Self::compile_field(field, arg);
        match op {
            "$in" => Ok(Self::In {
                field: field.to_string(),
                values: Self::literal_list(op, arg)?,
            }),
            "$all" => Ok(Self::All {
                field: field.to_string(),
                values: Self::literal_list(op, arg)?,
            }),
            "$exists" => match arg {
                Value::Bool(present) => Ok(Self::Exists {
                    field: field.to_string(),
                    present: *present,
                }),
                other => Err(CoreError::malformed_query(format!(
                    "$exists expects a boolean, got {other}"
                ))),
            },
            "$regex" => {
                let source = arg.as_text().ok_or_else(|| {
                    CoreError::malformed_query(format!("$regex expects text, got {arg}"))
                })?;
                let pattern = Regex::new(source)
                    .map_err(|e| CoreError::malformed_query(format!("bad $regex: {e}")))?;
                Ok(Self::Regex {
                    field: field.to_string(),
                    pattern,
                })
            }
            "$not" => match arg.as_map() {
                Some(_) => Ok(Self::Not(Box::new(field_expr(arg)?))),
                None => Err(CoreError::malformed_query(format!(
                    "$not on {field:?} expects an operator mapping"
                ))),
            },
            "$and" => Ok(Self::And(Self::compile_list(op, arg, field_expr)?)),
            "$or" => Ok(Self::Or(Self::compile_list(op, arg, field_expr)?)),
            unknown => Err(CoreError::malformed_query(format!(
                "unknown operator {unknown}"
            ))),
        }
    }

    fn compile_list<F>(op: &str, arg: &Value, compile: F) -> CoreResult<Vec<Self>>
    where
        F: Fn(&Value) -> CoreResult<Self>,
    {
        let items = arg.as_array().ok_or_else(|| {
            CoreError::malformed_query(format!("{op} expects a sequence, got {arg}"))
        })?;
        items.iter().map(compile).collect()
    }

    fn literal_list(op: &str, arg: &Value) -> CoreResult<Vec<Value>> {
        arg.as_array().map(<[Value]>::to_vec).ok_or_else(|| {
            CoreError::malformed_query(format!("{op} expects a sequence, got {arg}"))
        })
    }

    fn conjunction(mut terms: Vec<Self>) -> Self {
        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Self::And(terms)
        }
    }

    /// Returns every field path the query reads.
    #[must_use]
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Self::Not(child) => child.collect_fields(out),
            Self::Equality { field, .. }
            | Self::Range { field, .. }
            | Self::In { field, .. }
            | Self::All { field, .. }
            | Self::Exists { field, .. }
            | Self::Regex { field, .. } => {
                out.insert(field);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    fn compile(text: &str) -> CoreResult<Expr> {
        Expr::compile(&json(text))
    }

    #[test]
    fn empty_query_is_universal() {
        assert!(matches!(compile("{}").unwrap(), Expr::And(c) if c.is_empty()));
    }

    #[test]
    fn plain_field_is_equality() {
        let expr = compile(r#"{"name": "Al Pacino"}"#).unwrap();
        assert!(matches!(
            expr,
            Expr::Equality { ref field, ref value }
                if field == "name" && value == &Value::from("Al Pacino")
        ));
    }

    #[test]
    fn embedded_map_without_operators_is_equality() {
        let expr = compile(r#"{"meta": {"color": true}}"#).unwrap();
        assert!(matches!(expr, Expr::Equality { .. }));
    }

    #[test]
    fn several_fields_combine_with_and() {
        let expr = compile(r#"{"name": "x", "year": {"$gte": 1930}}"#).unwrap();
        let Expr::And(children) = expr else {
            panic!("expected And");
        };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn several_operators_on_one_field_combine_with_and() {
        let expr = compile(r#"{"year": {"$gte": 1900, "$lt": 1950}}"#).unwrap();
        let Expr::And(children) = expr else {
            panic!("expected And");
        };
        assert!(children
            .iter()
            .all(|c| matches!(c, Expr::Range { field, .. } if field == "year")));
    }

    #[test]
    fn nested_boolean_operators() {
        let expr = compile(
            r#"{"$or": [{"name": "a"}, {"$and": [{"year": 1}, {"$not": {"tags": "x"}}]}]}"#,
        )
        .unwrap();
        let Expr::Or(children) = &expr else {
            panic!("expected Or");
        };
        assert!(matches!(&children[1], Expr::And(inner) if matches!(inner[1], Expr::Not(_))));
        assert_eq!(
            expr.fields().into_iter().collect::<Vec<_>>(),
            vec!["name", "tags", "year"]
        );
    }

    #[test]
    fn field_level_not_and_or() {
        let expr = compile(r#"{"year": {"$not": {"$gt": 1950}}}"#).unwrap();
        assert!(matches!(expr, Expr::Not(inner) if matches!(*inner, Expr::Range { op: RangeOp::Gt, .. })));

        let expr = compile(r#"{"year": {"$or": [{"$lt": 1930}, {"$gt": 1970}]}}"#).unwrap();
        assert!(matches!(expr, Expr::Or(c) if c.len() == 2));
    }

    #[test]
    fn list_and_flag_operators() {
        assert!(matches!(
            compile(r#"{"tags": {"$in": ["a", "b"]}}"#).unwrap(),
            Expr::In { values, .. } if values.len() == 2
        ));
        assert!(matches!(
            compile(r#"{"tags": {"$all": ["a"]}}"#).unwrap(),
            Expr::All { .. }
        ));
        assert!(matches!(
            compile(r#"{"tags": {"$exists": false}}"#).unwrap(),
            Expr::Exists { present: false, .. }
        ));
        assert!(matches!(
            compile(r#"{"name": {"$regex": "^Al"}}"#).unwrap(),
            Expr::Regex { .. }
        ));
    }

    #[test]
    fn malformed_queries_rejected() {
        for bad in [
            r#"[1, 2]"#,
            r#""name""#,
            r#"{"name": {"$near": 1}}"#,
            r#"{"$gt": 1}"#,
            r#"{"year": {"$gt": 1, "plain": 2}}"#,
            r#"{"tags": {"$in": "a"}}"#,
            r#"{"tags": {"$exists": 1}}"#,
            r#"{"name": {"$regex": "("}}"#,
            r#"{"name": {"$regex": 5}}"#,
            r#"{"$or": {"a": 1}}"#,
            r#"{"a..b": 1}"#,
            r#"{"year": {"$not": 5}}"#,
        ] {
            assert!(
                matches!(compile(bad), Err(CoreError::MalformedQuery { .. })),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn range_op_semantics() {
        let five = Value::from(5);
        assert!(RangeOp::Gt.accepts(&Value::from(6), &five));
        assert!(!RangeOp::Gt.accepts(&five, &five));
        assert!(RangeOp::Gte.accepts(&five, &five));
        assert!(RangeOp::Lt.accepts(&Value::from(4.5), &five));
        assert!(RangeOp::Lte.accepts(&five, &five));
        assert!(!RangeOp::Lt.accepts(&Value::from("a"), &five));
        assert!(RangeOp::Ne.accepts(&Value::from("a"), &five));
        assert!(!RangeOp::Ne.accepts(&five, &five));
    }
}
