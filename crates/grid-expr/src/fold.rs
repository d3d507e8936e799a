//! Constant folding over the raw AST.
//!
//! Binary operations whose sides are both numeric collapse at parse time.
//! A constant division by zero folds to the null-value sentinel rather
//! than infinity; runtime division by zero is deliberately not guarded.

use crate::ast::{BinaryOp, Expr};
use grid_base::NULL_VAL;

/// Fold numeric subtrees. Field and call nodes are left untouched (calls
/// are not folded even over constant arguments; the registry functions are
/// cheap and the description string keeps its written form).
pub fn fold(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let lhs = fold(*lhs);
            let rhs = fold(*rhs);
            match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => {
                    if op == BinaryOp::Div && b == 0.0 {
                        Expr::Number(NULL_VAL)
                    } else {
                        Expr::Number(op.apply(a, b))
                    }
                }
                _ => Expr::binary(op, lhs, rhs),
            }
        }
        Expr::Call { name, args } => Expr::Call {
            name,
            args: args.into_iter().map(fold).collect(),
        },
        other => other,
    }
}
