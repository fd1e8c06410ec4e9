// SPDX-License-Identifier: MIT

//! Condition expression parser
//!
//! Precedence, loosest first: `or`, `and`, `not`, then comparisons.
//! Parentheses group.

use super::ast::{CompareOp, Expression, Literal};
use crate::hypogen::error::ConditionError;

/// Parse a condition expression string into an AST
pub fn parse(input: &str) -> Result<Expression, ConditionError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConditionError::Syntax(input.to_string()));
    }

    if let Some(pos) = find_top_level(input, " or ") {
        let left = parse(&input[..pos])?;
        let right = parse(&input[pos + 4..])?;
        return Ok(Expression::Or(Box::new(left), Box::new(right)));
    }
    if let Some(pos) = find_top_level(input, " and ") {
        let left = parse(&input[..pos])?;
        let right = parse(&input[pos + 5..])?;
        return Ok(Expression::And(Box::new(left), Box::new(right)));
    }
    if let Some(rest) = input.strip_prefix("not ") {
        return Ok(Expression::Not(Box::new(parse(rest)?)));
    }
    if input.starts_with('(') && input.ends_with(')') && wraps_whole(input) {
        return parse(&input[1..input.len() - 1]);
    }

    match input {
        "true" => Ok(Expression::True),
        "false" => Ok(Expression::False),
        _ => parse_comparison(input),
    }
}

fn parse_comparison(input: &str) -> Result<Expression, ConditionError> {
    // Longest operators first
    let operators = [
        ("!=", CompareOp::NotEq),
        (">=", CompareOp::Gte),
        ("<=", CompareOp::Lte),
        ("==", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        (" contains ", CompareOp::Contains),
    ];

    for (op_str, op) in operators {
        if let Some(pos) = find_top_level(input, op_str) {
            let left = input[..pos].trim();
            if !is_path(left) {
                return Err(ConditionError::Syntax(input.to_string()));
            }
            let right = parse_literal(&input[pos + op_str.len()..])?;
            return Ok(Expression::Compare {
                left: left.to_string(),
                op,
                right,
            });
        }
    }

    Err(ConditionError::Syntax(input.to_string()))
}

/// Byte offset of `needle` outside quotes and parentheses
fn find_top_level(input: &str, needle: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;

    for i in 0..bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if depth == 0 && bytes[i..].starts_with(needle.as_bytes()) => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// True when the opening parenthesis closes at the very end
fn wraps_whole(input: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && i + 1 < input.len() {
                        return false;
                    }
                }
                _ => {}
            },
        }
    }
    depth == 0
}

fn is_path(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn parse_literal(input: &str) -> Result<Literal, ConditionError> {
    let input = input.trim();

    match input {
        "null" => return Ok(Literal::Null),
        "true" => return Ok(Literal::Boolean(true)),
        "false" => return Ok(Literal::Boolean(false)),
        _ => {}
    }

    if input.len() >= 2
        && ((input.starts_with('\'') && input.ends_with('\''))
            || (input.starts_with('"') && input.ends_with('"')))
    {
        return Ok(Literal::String(input[1..input.len() - 1].to_string()));
    }

    input
        .parse::<f64>()
        .map(Literal::Number)
        .map_err(|_| ConditionError::Literal(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(left: &str, op: CompareOp, right: Literal) -> Expression {
        Expression::Compare {
            left: left.to_string(),
            op,
            right,
        }
    }

    #[test]
    fn test_parse_contains() {
        assert_eq!(
            parse("critique contains 'ACCEPT'").unwrap(),
            compare(
                "critique",
                CompareOp::Contains,
                Literal::String("ACCEPT".to_string())
            )
        );
    }

    #[test]
    fn test_parse_numeric_comparisons() {
        assert_eq!(
            parse("iteration >= 3").unwrap(),
            compare("iteration", CompareOp::Gte, Literal::Number(3.0))
        );
        assert_eq!(
            parse("score < 0.5").unwrap(),
            compare("score", CompareOp::Lt, Literal::Number(0.5))
        );
        assert_eq!(
            parse("score != 1").unwrap(),
            compare("score", CompareOp::NotEq, Literal::Number(1.0))
        );
    }

    #[test]
    fn test_parse_null_and_boolean() {
        assert_eq!(
            parse("summary == null").unwrap(),
            compare("summary", CompareOp::Eq, Literal::Null)
        );
        assert_eq!(
            parse(r#"paths.valid == true"#).unwrap(),
            compare("paths.valid", CompareOp::Eq, Literal::Boolean(true))
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("a == 'x' or b > 1 and c < 2").unwrap();
        match expr {
            Expression::Or(left, right) => {
                assert_eq!(
                    *left,
                    compare("a", CompareOp::Eq, Literal::String("x".to_string()))
                );
                assert!(matches!(*right, Expression::And(_, _)));
            }
            other => panic!("Expected Or expression, got {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_and_not() {
        let expr = parse("not (critique contains 'ACCEPT' or iteration >= 3)").unwrap();
        match expr {
            Expression::Not(inner) => assert!(matches!(*inner, Expression::Or(_, _))),
            other => panic!("Expected Not expression, got {:?}", other),
        }

        let expr = parse("(a == 1) and (b == 2)").unwrap();
        assert!(matches!(expr, Expression::And(_, _)));
    }

    #[test]
    fn test_operators_inside_quotes_are_ignored() {
        assert_eq!(
            parse("critique contains 'a >= b and c'").unwrap(),
            compare(
                "critique",
                CompareOp::Contains,
                Literal::String("a >= b and c".to_string())
            )
        );
    }

    #[test]
    fn test_parse_true_false() {
        assert_eq!(parse("true").unwrap(), Expression::True);
        assert_eq!(parse("false").unwrap(), Expression::False);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse("this is not valid").is_err());
        assert!(parse("").is_err());
        assert!(matches!(
            parse("score > high"),
            Err(ConditionError::Literal(_))
        ));
        assert!(parse("my score > 1").is_err());
    }
}
