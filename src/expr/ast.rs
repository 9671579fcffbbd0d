//! Expression tree and builder methods.

use std::collections::BTreeMap;
use std::ops;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// A typed expression tree.
///
/// Expressions are built with [`field`], literal conversions, and the
/// methods and operator overloads on this type, then lowered with
/// [`Expr::compile`]. Trees serialize as tagged JSON so stages that carry
/// expressions round-trip through their serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    /// A field reference, resolved against the compile prefix.
    ///
    /// The empty path refers to the context document itself. Paths that
    /// already start with `$` are emitted verbatim and thus ignore the
    /// prefix (root-bound references and `$$` variables).
    Field { path: String },
    /// A literal value, guarded against operator interpretation.
    Literal { value: Value },
    /// A raw aggregation expression, validated against the known
    /// operator set at compile time.
    Raw { value: Value },
    Compare {
        #[serde(rename = "cmp")]
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And { exprs: Vec<Expr> },
    Or { exprs: Vec<Expr> },
    Not { expr: Box<Expr> },
    Arith {
        #[serde(rename = "arith")]
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Abs { expr: Box<Expr> },
    Min { lhs: Box<Expr>, rhs: Box<Expr> },
    Max { lhs: Box<Expr>, rhs: Box<Expr> },
    /// Element access on an array; negative indexes count from the end.
    Index { expr: Box<Expr>, index: i64 },
    /// Array length; missing and null arrays count as empty.
    Length { expr: Box<Expr> },
    Map { input: Box<Expr>, body: Box<Expr> },
    Filter { input: Box<Expr>, cond: Box<Expr> },
    Reduce {
        input: Box<Expr>,
        init: Value,
        combine: Box<Expr>,
    },
    Sum { input: Box<Expr> },
    Contains { input: Box<Expr>, value: Value },
    IsIn { expr: Box<Expr>, values: Vec<Value> },
    /// Tests whether a value is non-null; `expect = false` negates.
    Exists { expr: Box<Expr>, expect: bool },
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Upper { expr: Box<Expr> },
    Lower { expr: Box<Expr> },
    Concat { exprs: Vec<Expr> },
    StartsWith { expr: Box<Expr>, prefix: String },
    EndsWith { expr: Box<Expr>, suffix: String },
    MatchesRegex { expr: Box<Expr>, pattern: String },
    /// Replaces string values according to a mapping; unmapped values
    /// pass through unchanged.
    MapValues {
        expr: Box<Expr>,
        mapping: BTreeMap<String, Value>,
    },
}

/// Creates a reference to the named field.
pub fn field(path: impl Into<String>) -> Expr {
    Expr::Field { path: path.into() }
}

impl Expr {
    /// References the context document itself (the prefix, if any).
    pub fn current() -> Expr {
        Expr::Field {
            path: String::new(),
        }
    }

    /// References the running value inside a `reduce`.
    pub fn accumulator() -> Expr {
        Expr::Field {
            path: "$$value".to_string(),
        }
    }

    /// Wraps a plain value as a literal expression.
    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal {
            value: value.into(),
        }
    }

    /// Wraps a pre-built aggregation expression.
    pub fn raw(value: Value) -> Expr {
        Expr::Raw { value }
    }

    fn compare(self, op: CmpOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Compare {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Ne, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Gt, rhs)
    }

    pub fn gte(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Gte, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Lt, rhs)
    }

    pub fn lte(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CmpOp::Lte, rhs)
    }

    /// Tests for a non-null value, or a null/missing one when `expect`
    /// is false.
    pub fn exists(self, expect: bool) -> Expr {
        Expr::Exists {
            expr: Box::new(self),
            expect,
        }
    }

    /// Tests membership of this value in a fixed set.
    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::IsIn {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Tests whether this array contains the given value.
    pub fn contains(self, value: impl Into<Value>) -> Expr {
        Expr::Contains {
            input: Box::new(self),
            value: value.into(),
        }
    }

    /// The length of this array, treating null/missing as empty.
    pub fn length(self) -> Expr {
        Expr::Length {
            expr: Box::new(self),
        }
    }

    /// The element at `index`; negative indexes count from the end.
    pub fn index(self, index: i64) -> Expr {
        Expr::Index {
            expr: Box::new(self),
            index,
        }
    }

    /// Applies `body` to each element of this array. Inside `body`, bare
    /// field references bind to the element.
    pub fn map(self, body: Expr) -> Expr {
        Expr::Map {
            input: Box::new(self),
            body: Box::new(body),
        }
    }

    /// Keeps the elements of this array for which `cond` holds.
    pub fn filter(self, cond: Expr) -> Expr {
        Expr::Filter {
            input: Box::new(self),
            cond: Box::new(cond),
        }
    }

    /// Folds this array with `combine`, starting from `init`. Inside
    /// `combine`, bare references bind to the element and
    /// [`Expr::accumulator`] to the running value.
    pub fn reduce(self, init: impl Into<Value>, combine: Expr) -> Expr {
        Expr::Reduce {
            input: Box::new(self),
            init: init.into(),
            combine: Box::new(combine),
        }
    }

    /// Sums the numeric elements of this array.
    pub fn sum(self) -> Expr {
        Expr::Sum {
            input: Box::new(self),
        }
    }

    /// Branches on this expression as a condition.
    pub fn if_else(self, then: impl Into<Expr>, otherwise: impl Into<Expr>) -> Expr {
        Expr::IfElse {
            cond: Box::new(self),
            then: Box::new(then.into()),
            otherwise: Box::new(otherwise.into()),
        }
    }

    pub fn abs(self) -> Expr {
        Expr::Abs {
            expr: Box::new(self),
        }
    }

    pub fn min(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Min {
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn max(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Max {
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn upper(self) -> Expr {
        Expr::Upper {
            expr: Box::new(self),
        }
    }

    pub fn lower(self) -> Expr {
        Expr::Lower {
            expr: Box::new(self),
        }
    }

    /// String concatenation; flattens chained calls.
    pub fn concat(self, rhs: impl Into<Expr>) -> Expr {
        match self {
            Expr::Concat { mut exprs } => {
                exprs.push(rhs.into());
                Expr::Concat { exprs }
            }
            other => Expr::Concat {
                exprs: vec![other, rhs.into()],
            },
        }
    }

    /// Tests whether this string starts with a literal prefix.
    pub fn starts_with(self, prefix: impl Into<String>) -> Expr {
        Expr::StartsWith {
            expr: Box::new(self),
            prefix: prefix.into(),
        }
    }

    /// Tests whether this string ends with a literal suffix.
    pub fn ends_with(self, suffix: impl Into<String>) -> Expr {
        Expr::EndsWith {
            expr: Box::new(self),
            suffix: suffix.into(),
        }
    }

    /// Tests this string against a regular expression. The pattern is
    /// validated when the expression is compiled.
    pub fn matches_regex(self, pattern: impl Into<String>) -> Expr {
        Expr::MatchesRegex {
            expr: Box::new(self),
            pattern: pattern.into(),
        }
    }

    /// Replaces values of this expression according to `mapping`.
    pub fn map_values<I, K, V>(self, mapping: I) -> Expr
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Expr::MapValues {
            expr: Box::new(self),
            mapping: mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal { value }
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal {
            value: Value::String(value.to_string()),
        }
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal {
            value: Value::String(value),
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal {
            value: Value::from(value),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Literal {
            value: Value::from(value),
        }
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal {
            value: Value::Bool(value),
        }
    }
}

impl<T: Into<Expr>> ops::Add<T> for Expr {
    type Output = Expr;

    fn add(self, rhs: T) -> Expr {
        Expr::Arith {
            op: ArithOp::Add,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }
}

impl<T: Into<Expr>> ops::Sub<T> for Expr {
    type Output = Expr;

    fn sub(self, rhs: T) -> Expr {
        Expr::Arith {
            op: ArithOp::Subtract,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }
}

impl<T: Into<Expr>> ops::Mul<T> for Expr {
    type Output = Expr;

    fn mul(self, rhs: T) -> Expr {
        Expr::Arith {
            op: ArithOp::Multiply,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }
}

impl<T: Into<Expr>> ops::Div<T> for Expr {
    type Output = Expr;

    fn div(self, rhs: T) -> Expr {
        Expr::Arith {
            op: ArithOp::Divide,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }
}

impl ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        match self {
            Expr::And { mut exprs } => {
                exprs.push(rhs);
                Expr::And { exprs }
            }
            other => Expr::And {
                exprs: vec![other, rhs],
            },
        }
    }
}

impl ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        match self {
            Expr::Or { mut exprs } => {
                exprs.push(rhs);
                Expr::Or { exprs }
            }
            other => Expr::Or {
                exprs: vec![other, rhs],
            },
        }
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not {
            expr: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_overloads_build_trees() {
        let expr = field("confidence").gt(0.5) & field("label").eq("cat");
        match expr {
            Expr::And { exprs } => assert_eq!(exprs.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }

        let expr = field("a").exists(true) | field("b").exists(true) | field("c").exists(true);
        match expr {
            Expr::Or { exprs } => assert_eq!(exprs.len(), 3),
            other => panic!("expected flattened Or, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_overloads() {
        let expr = (field("x") + 1i64) * 2i64;
        match expr {
            Expr::Arith {
                op: ArithOp::Multiply,
                lhs,
                ..
            } => match *lhs {
                Expr::Arith {
                    op: ArithOp::Add, ..
                } => {}
                other => panic!("expected nested Add, got {:?}", other),
            },
            other => panic!("expected Multiply, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_flattens() {
        let expr = field("a").concat("-").concat(field("b"));
        match expr {
            Expr::Concat { exprs } => assert_eq!(exprs.len(), 3),
            other => panic!("expected Concat, got {:?}", other),
        }
    }

    #[test]
    fn test_literal_conversions() {
        assert_eq!(
            Expr::from("cat"),
            Expr::Literal {
                value: json!("cat")
            }
        );
        assert_eq!(Expr::from(2i64), Expr::Literal { value: json!(2) });
        assert_eq!(Expr::from(true), Expr::Literal { value: json!(true) });
    }

    #[test]
    fn test_serialization_round_trip() {
        let expr = field("confidence").gt(0.9) & !field("label").is_in(["cat", "dog"]);
        let encoded = serde_json::to_value(&expr).unwrap();
        let decoded: Expr = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, expr);
    }
}
