//! The event string form.
//!
//! Events are written `<target-field> = <value> ['@' <time>]`; relay alarm
//! actions are written `alarm <code-or-name>`. The target field may carry
//! an object path and a unit annotation exactly like grabber fields.

use serde::{Deserialize, Serialize};

use crate::parser::parse_expression;
use crate::{Expr, ExprError};

/// A parsed event string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventSpec {
    /// Assign `value` to `field` on the target object, optionally at a
    /// scheduled time.
    Assignment {
        object: Option<String>,
        field: String,
        units: Option<String>,
        value: f64,
        time: Option<f64>,
    },
    /// Send an alarm. Numeric codes pass through; names are resolved by
    /// the relay layer.
    Alarm { code: Option<u32>, name: Option<String> },
}

/// Parse an event string.
pub fn parse_event(input: &str) -> Result<EventSpec, ExprError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }

    // alarm form: the keyword must stand alone
    let lowered = trimmed.to_ascii_lowercase();
    if lowered == "alarm" || lowered.starts_with("alarm ") || lowered.starts_with("alarm\t") {
        let rest = &lowered["alarm".len()..];
        let code_str = rest.trim();
        if code_str.is_empty() {
            return Err(ExprError::Parse {
                input: input.to_string(),
                message: "alarm requires a code or name".to_string(),
            });
        }
        return Ok(match code_str.parse::<u32>() {
            Ok(code) => EventSpec::Alarm {
                code: Some(code),
                name: None,
            },
            Err(_) => EventSpec::Alarm {
                code: None,
                name: Some(code_str.to_string()),
            },
        });
    }

    // assignment form: split on the first '=' not part of a comparison
    let eq = trimmed.find('=').ok_or_else(|| ExprError::Parse {
        input: input.to_string(),
        message: "expected '=' in event string".to_string(),
    })?;
    let (target_str, rest) = trimmed.split_at(eq);
    let rest = &rest[1..];

    let (object, field, units) = match parse_expression(target_str)? {
        Expr::Field {
            object,
            field,
            units,
        } => (object, field, units),
        other => {
            return Err(ExprError::Parse {
                input: input.to_string(),
                message: format!("event target must be a field, got '{other}'"),
            })
        }
    };

    let (value_str, time) = match rest.split_once('@') {
        Some((v, t)) => {
            let t: f64 = t.trim().parse().map_err(|_| ExprError::Parse {
                input: input.to_string(),
                message: format!("invalid event time '{}'", t.trim()),
            })?;
            (v, Some(t))
        }
        None => (rest, None),
    };

    let value = evaluate_constant(value_str, input)?;

    Ok(EventSpec::Assignment {
        object,
        field,
        units,
        value,
        time,
    })
}

/// The value side must fold to a number (`1.0`, `2*0.5`, ...).
fn evaluate_constant(value_str: &str, original: &str) -> Result<f64, ExprError> {
    let expr = crate::fold::fold(parse_expression(value_str)?);
    expr.as_number().ok_or_else(|| ExprError::Parse {
        input: original.to_string(),
        message: format!("event value '{}' is not constant", value_str.trim()),
    })
}
