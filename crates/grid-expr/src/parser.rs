//! Expression parser.
//!
//! Grammar (whitespace-insensitive between tokens):
//!
//! ```text
//! expr      := term (('+' | '-') term)*
//! term      := factor (('*' | '/' | '%' | '^') factor)*
//! factor    := number | field | funcname '(' expr (',' expr)? ')' | '(' expr ')'
//! field     := [object-path ':'] identifier ['(' unit-name ')']
//! condition := expr cmp expr
//! cmp       := '<' | '<=' | '>' | '>=' | '==' | '!=' | '~='
//! ```
//!
//! `name(...)` parses as a function call only when `name` is in the
//! function registry; otherwise the parenthesized token is a unit
//! annotation on a field. A trailing ` as <name>` on a grabber string
//! rebinds its description.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map_res, opt, recognize},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::ast::{BinaryOp, Comparison, ConditionSpec, Expr, GrabberSpec};
use crate::functions::is_function;
use crate::ExprError;

// ============================================================================
// Public API
// ============================================================================

/// Parse a bare expression, requiring all input to be consumed.
pub fn parse_expression(input: &str) -> Result<Expr, ExprError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }
    let (rest, expr) = expression(trimmed).map_err(|e| parse_error(input, e))?;
    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(ExprError::Trailing(rest.to_string()));
    }
    Ok(expr)
}

/// Parse a grabber string, honoring a trailing ` as <name>`.
pub fn parse_grabber(input: &str) -> Result<GrabberSpec, ExprError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }
    let (rest, expr) = expression(trimmed).map_err(|e| parse_error(input, e))?;
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Ok(GrabberSpec {
            expr,
            description: None,
        });
    }
    if let Some(name) = rest.strip_prefix("as ").or_else(|| rest.strip_prefix("as\t")) {
        let name = name.trim();
        if name.is_empty() {
            return Err(ExprError::Trailing(rest.to_string()));
        }
        return Ok(GrabberSpec {
            expr,
            description: Some(name.to_string()),
        });
    }
    Err(ExprError::Trailing(rest.to_string()))
}

/// Parse a condition string (`expr cmp expr`).
pub fn parse_condition(input: &str) -> Result<ConditionSpec, ExprError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }
    let (rest, lhs) = expression(trimmed).map_err(|e| parse_error(input, e))?;
    let (rest, token) =
        preceded(multispace0, comparison_token)(rest).map_err(|e| parse_error(input, e))?;
    let comparison = Comparison::from_token(token)?;
    let (rest, rhs) =
        preceded(multispace0, expression)(rest).map_err(|e| parse_error(input, e))?;
    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(ExprError::Trailing(rest.to_string()));
    }
    Ok(ConditionSpec {
        lhs,
        comparison,
        rhs,
    })
}

// ============================================================================
// Internal parsers
// ============================================================================

fn parse_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> ExprError {
    ExprError::Parse {
        input: input.to_string(),
        message: err.to_string(),
    }
}

fn expression(input: &str) -> IResult<&str, Expr> {
    let (mut rest, mut acc) = term(input)?;
    loop {
        let attempt: IResult<&str, (char, Expr)> = pair(
            preceded(multispace0, one_of("+-")),
            preceded(multispace0, term),
        )(rest);
        match attempt {
            Ok((next, (op, rhs))) => {
                let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
                acc = Expr::binary(op, acc, rhs);
                rest = next;
            }
            Err(_) => return Ok((rest, acc)),
        }
    }
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (mut rest, mut acc) = factor(input)?;
    loop {
        let attempt: IResult<&str, (char, Expr)> = pair(
            preceded(multispace0, one_of("*/%^")),
            preceded(multispace0, factor),
        )(rest);
        match attempt {
            Ok((next, (op, rhs))) => {
                let op = match op {
                    '*' => BinaryOp::Mul,
                    // '%' is the alternate division spelling
                    '/' | '%' => BinaryOp::Div,
                    _ => BinaryOp::Pow,
                };
                acc = Expr::binary(op, acc, rhs);
                rest = next;
            }
            Err(_) => return Ok((rest, acc)),
        }
    }
}

fn factor(input: &str) -> IResult<&str, Expr> {
    let (rest, neg) = opt(preceded(multispace0, char('-')))(input)?;
    let (rest, expr) = preceded(multispace0, alt((number, parens, call_or_field)))(rest)?;
    let expr = match (neg, expr) {
        (Some(_), Expr::Number(v)) => Expr::Number(-v),
        (Some(_), other) => Expr::binary(BinaryOp::Mul, Expr::Number(-1.0), other),
        (None, other) => other,
    };
    Ok((rest, expr))
}

fn parens(input: &str) -> IResult<&str, Expr> {
    delimited(
        char('('),
        preceded(multispace0, expression),
        preceded(multispace0, char(')')),
    )(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map_res(
        recognize(tuple((
            alt((
                recognize(tuple((digit1, opt(pair(char('.'), opt(digit1)))))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| s.parse::<f64>().map(Expr::Number),
    )(input)
}

/// Identifier segment: not starting with a digit so numbers stay numbers.
fn segment(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || "_@#".contains(c)),
        opt(take_while1(|c: char| {
            c.is_ascii_alphanumeric() || "_@#.$".contains(c)
        })),
    ))(input)
}

/// A path is segments joined by single colons; the last segment is the
/// field, everything before it the object path.
fn path(input: &str) -> IResult<&str, &str> {
    recognize(pair(segment, opt(pair(char(':'), path))))(input)
}

fn call_or_field(input: &str) -> IResult<&str, Expr> {
    let (rest, full_path) = path(input)?;
    let is_bare = !full_path.contains(':');

    if is_bare && is_function(full_path) {
        // function call form requires the parenthesis
        let (rest, args) = delimited(
            preceded(multispace0, char('(')),
            call_args,
            preceded(multispace0, char(')')),
        )(rest)?;
        return Ok((
            rest,
            Expr::Call {
                name: full_path.to_string(),
                args,
            },
        ));
    }

    // optional unit annotation
    let (rest, units) = opt(delimited(
        char('('),
        preceded(multispace0, segment),
        preceded(multispace0, char(')')),
    ))(rest)?;

    let (object, field) = match full_path.rsplit_once(':') {
        Some((obj, fld)) => (Some(obj.to_string()), fld.to_string()),
        None => (None, full_path.to_string()),
    };
    Ok((
        rest,
        Expr::Field {
            object,
            field,
            units: units.map(|u| u.to_string()),
        },
    ))
}

fn call_args(input: &str) -> IResult<&str, Vec<Expr>> {
    let (rest, first) = preceded(multispace0, expression)(input)?;
    let (rest, second) = opt(preceded(
        preceded(multispace0, char(',')),
        preceded(multispace0, expression),
    ))(rest)?;
    let mut args = vec![first];
    if let Some(s) = second {
        args.push(s);
    }
    Ok((rest, args))
}

fn comparison_token(input: &str) -> IResult<&str, &str> {
    alt((
        tag("<="),
        tag(">="),
        tag("=="),
        tag("!="),
        tag("~="),
        tag("<>"),
        tag("<"),
        tag(">"),
        tag("="),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn simple_field() {
        let e = parse_expression("voltage").unwrap();
        assert_eq!(e, Expr::field("voltage"));
    }

    #[test]
    fn field_with_object_and_units() {
        let e = parse_expression("bus2:voltage(kV)").unwrap();
        assert_eq!(
            e,
            Expr::Field {
                object: Some("bus2".into()),
                field: "voltage".into(),
                units: Some("kV".into()),
            }
        );
    }

    #[test]
    fn nested_object_path() {
        let e = parse_expression("area1:bus2:angle").unwrap();
        assert_eq!(
            e,
            Expr::Field {
                object: Some("area1:bus2".into()),
                field: "angle".into(),
                units: None,
            }
        );
    }

    #[test]
    fn arithmetic_precedence() {
        let e = parse_expression("voltage - 0.4 * 2").unwrap();
        assert_eq!(
            e,
            Expr::binary(
                BinaryOp::Sub,
                Expr::field("voltage"),
                Expr::binary(BinaryOp::Mul, Expr::Number(0.4), Expr::Number(2.0)),
            )
        );
    }

    #[test]
    fn left_associative_subtraction() {
        let e = parse_expression("10-4-3").unwrap();
        assert_eq!(crate::fold::fold(e), Expr::Number(3.0));
    }

    #[test]
    fn function_call() {
        let e = parse_expression("sqrt(p^2+q^2)/@bus:v").unwrap();
        match e {
            Expr::Binary { op, lhs, rhs } => {
                assert_eq!(op, BinaryOp::Div);
                assert!(matches!(*lhs, Expr::Call { ref name, .. } if name == "sqrt"));
                assert_eq!(
                    *rhs,
                    Expr::Field {
                        object: Some("@bus".into()),
                        field: "v".into(),
                        units: None,
                    }
                );
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn two_argument_function() {
        let e = parse_expression("hypot(p1,q1)").unwrap();
        match e {
            Expr::Call { name, args } => {
                assert_eq!(name, "hypot");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn percent_is_division() {
        let e = parse_expression("6%3").unwrap();
        assert_eq!(crate::fold::fold(e), Expr::Number(2.0));
    }

    #[test]
    fn unary_minus() {
        let e = parse_expression("-0.5").unwrap();
        assert_eq!(e, Expr::Number(-0.5));
        let e = parse_expression("-voltage").unwrap();
        assert_eq!(
            e,
            Expr::binary(BinaryOp::Mul, Expr::Number(-1.0), Expr::field("voltage"))
        );
    }

    #[test]
    fn grabber_with_description() {
        let g = parse_grabber("bus1:voltage as vmag").unwrap();
        assert_eq!(g.description.as_deref(), Some("vmag"));
        let g = parse_grabber("bus1:voltage").unwrap();
        assert_eq!(g.description, None);
    }

    #[test]
    fn condition_parse() {
        let c = parse_condition("voltage < 0.7").unwrap();
        assert_eq!(c.comparison, Comparison::Lt);
        assert_eq!(c.lhs, Expr::field("voltage"));
        assert_eq!(c.rhs, Expr::Number(0.7));

        let c = parse_condition("current1>current2").unwrap();
        assert_eq!(c.comparison, Comparison::Gt);

        let c = parse_condition("freq ~= 1.0").unwrap();
        assert_eq!(c.comparison, Comparison::Ne);
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(matches!(
            parse_expression("voltage )"),
            Err(ExprError::Trailing(_))
        ));
        assert!(matches!(parse_expression("  "), Err(ExprError::Empty)));
    }
}
