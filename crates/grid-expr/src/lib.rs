//! The measurement expression language.
//!
//! Relay, sensor, and collector configuration refer to signals with small
//! text expressions (`bus2:voltage - 0.4 < 0.7`, `sqrt(p^2+q^2)/@bus:v`).
//! This crate parses them into a *raw* AST in which object references are
//! plain strings; binding references against the live component tree is a
//! separate enrichment pass owned by the engine crate.
//!
//! ## Pipeline
//!
//! ```text
//! Source -> parser -> raw AST (strings, numbers)
//!                         |
//!                  constant folding
//!                         |
//!             engine binding pass (objects resolved, gain/bias absorbed)
//! ```

pub mod ast;
pub mod event;
pub mod fold;
pub mod functions;
pub mod parser;

pub use ast::{BinaryOp, Comparison, ConditionSpec, Expr, GrabberSpec};
pub use event::{parse_event, EventSpec};
pub use fold::fold;
pub use functions::{function1, function2, is_function};
pub use parser::{parse_condition, parse_expression, parse_grabber};

use thiserror::Error;

/// Failure to interpret an expression string.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unable to parse '{input}': {message}")]
    Parse { input: String, message: String },

    #[error("unknown comparison operator '{0}'")]
    UnknownComparison(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("trailing input '{0}'")]
    Trailing(String),
}
