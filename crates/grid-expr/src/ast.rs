//! Raw expression AST.
//!
//! All object references are strings here; no tree lookups happen at parse
//! time. `Field.object` holds everything before the last `:` of a path
//! (`None` when the field applies to the default target).

use crate::ExprError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary arithmetic operators.
///
/// Both `/` and `%` divide: the percent form exists so expressions can be
/// embedded in contexts where a slash is significant (URI-style sources).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Pow => '^',
        }
    }

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }
}

/// A parsed expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Field {
        /// Object path before the last `:`, if any.
        object: Option<String>,
        field: String,
        /// Output unit annotation from `field(unit)`.
        units: Option<String>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn number(value: f64) -> Expr {
        Expr::Number(value)
    }

    pub fn field(name: &str) -> Expr {
        Expr::Field {
            object: None,
            field: name.to_string(),
            units: None,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Reconstruct a display form; used for grabber descriptions.
    pub fn describe(&self) -> String {
        match self {
            Expr::Number(v) => format!("{v}"),
            Expr::Field {
                object,
                field,
                units,
            } => {
                let mut s = String::new();
                if let Some(obj) = object {
                    s.push_str(obj);
                    s.push(':');
                }
                s.push_str(field);
                if let Some(u) = units {
                    s.push('(');
                    s.push_str(u);
                    s.push(')');
                }
                s
            }
            Expr::Call { name, args } => {
                let inner: Vec<String> = args.iter().map(Expr::describe).collect();
                format!("{}({})", name, inner.join(","))
            }
            Expr::Binary { op, lhs, rhs } => {
                format!("{}{}{}", lhs.describe(), op.symbol(), rhs.describe())
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Comparison operators for condition strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    pub fn from_token(token: &str) -> Result<Comparison, ExprError> {
        match token {
            ">" | "gt" => Ok(Comparison::Gt),
            ">=" | "ge" => Ok(Comparison::Ge),
            "<" | "lt" => Ok(Comparison::Lt),
            "<=" | "le" => Ok(Comparison::Le),
            "=" | "==" | "eq" => Ok(Comparison::Eq),
            "!=" | "~=" | "<>" | "ne" => Ok(Comparison::Ne),
            other => Err(ExprError::UnknownComparison(other.to_string())),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }

    /// Non-strict comparisons treat a zero residual as satisfied.
    pub fn is_equality(&self) -> bool {
        matches!(self, Comparison::Ge | Comparison::Le | Comparison::Eq)
    }
}

/// A grabber string: an expression plus an optional ` as <name>`
/// description override at the tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrabberSpec {
    pub expr: Expr,
    pub description: Option<String>,
}

/// A condition string: `expr cmp expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub lhs: Expr,
    pub comparison: Comparison,
    pub rhs: Expr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_round_trip() {
        let e = Expr::binary(
            BinaryOp::Sub,
            Expr::field("voltage"),
            Expr::Number(0.4),
        );
        assert_eq!(e.describe(), "voltage-0.4");
    }

    #[test]
    fn comparison_tokens() {
        assert_eq!(Comparison::from_token("<=").unwrap(), Comparison::Le);
        assert_eq!(Comparison::from_token("~=").unwrap(), Comparison::Ne);
        assert!(Comparison::from_token("<<").is_err());
        assert!(Comparison::Le.is_equality());
        assert!(!Comparison::Lt.is_equality());
    }

    #[test]
    fn op_apply() {
        assert_eq!(BinaryOp::Pow.apply(2.0, 3.0), 8.0);
        assert_eq!(BinaryOp::Div.apply(1.0, 4.0), 0.25);
    }
}
