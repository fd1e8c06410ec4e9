// SPDX-License-Identifier: MIT

//! Condition expression evaluator
//!
//! Evaluation is a pure function of the blackboard snapshot.

use super::ast::{CompareOp, Expression, Literal};
use crate::hypogen::state::Blackboard;
use serde_json::Value;

/// Evaluate a condition expression against the blackboard
pub fn evaluate(expr: &Expression, state: &Blackboard) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::Compare { left, op, right } => {
            evaluate_compare(state.get_path(left), *op, right)
        }
        Expression::And(left, right) => evaluate(left, state) && evaluate(right, state),
        Expression::Or(left, right) => evaluate(left, state) || evaluate(right, state),
        Expression::Not(inner) => !evaluate(inner, state),
    }
}

fn evaluate_compare(left: Option<&Value>, op: CompareOp, right: &Literal) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::NotEq => !values_equal(left, right),
        CompareOp::Gt => compare_numbers(left, right, |a, b| a > b),
        CompareOp::Gte => compare_numbers(left, right, |a, b| a >= b),
        CompareOp::Lt => compare_numbers(left, right, |a, b| a < b),
        CompareOp::Lte => compare_numbers(left, right, |a, b| a <= b),
        CompareOp::Contains => check_contains(left, right),
    }
}

/// Unset channels, `Null` and empty lists all compare equal to `null`
fn values_equal(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (None | Some(Value::Null), Literal::Null) => true,
        (Some(Value::Array(items)), Literal::Null) => items.is_empty(),
        (None, _) => false,
        (Some(Value::String(s)), Literal::String(rs)) => s == rs,
        (Some(Value::Number(n)), Literal::Number(rn)) => n
            .as_f64()
            .map(|f| (f - rn).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Some(Value::Bool(b)), Literal::Boolean(rb)) => b == rb,
        _ => false,
    }
}

fn compare_numbers<F>(left: Option<&Value>, right: &Literal, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (left, right) {
        (Some(Value::Number(n)), Literal::Number(rn)) => {
            n.as_f64().map(|f| cmp(f, *rn)).unwrap_or(false)
        }
        _ => false,
    }
}

fn check_contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(substr)) => s.contains(substr.as_str()),
        (Some(Value::Array(arr)), Literal::String(val)) => {
            arr.iter().any(|v| v.as_str() == Some(val.as_str()))
        }
        (Some(Value::Array(arr)), Literal::Number(val)) => arr.iter().any(|v| {
            v.as_f64()
                .map(|f| (f - val).abs() < f64::EPSILON)
                .unwrap_or(false)
        }),
        (Some(Value::Array(arr)), Literal::Boolean(val)) => {
            arr.iter().any(|v| v.as_bool() == Some(*val))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypogen::condition::parser::parse;
    use crate::hypogen::state::schema::{CRITIQUE, FAILED_BRANCH, ITERATION, SCORE};
    use crate::hypogen::state::{StateSchema, Write};
    use serde_json::json;
    use std::sync::Arc;

    fn state_with(writes: Vec<Write>) -> Blackboard {
        let mut state = Blackboard::new(Arc::new(StateSchema::hypothesis()));
        for w in &writes {
            state.apply(w).unwrap();
        }
        state
    }

    fn holds(cond: &str, state: &Blackboard) -> bool {
        evaluate(&parse(cond).unwrap(), state)
    }

    #[test]
    fn test_critique_contains() {
        let state = state_with(vec![Write::set(CRITIQUE, json!("Verdict: ACCEPT"))]);
        assert!(holds("critique contains 'ACCEPT'", &state));
        assert!(!holds("critique contains 'REJECT'", &state));
    }

    #[test]
    fn test_counter_comparison() {
        let state = state_with(vec![Write::increment(ITERATION), Write::increment(ITERATION)]);
        assert!(holds("iteration >= 2", &state));
        assert!(!holds("iteration >= 3", &state));
        assert!(holds("iteration == 2", &state));
    }

    #[test]
    fn test_unset_and_empty_are_null() {
        let state = state_with(vec![]);
        assert!(holds("critique == null", &state));
        assert!(holds("failed_branch == null", &state));
        assert!(holds("missing == null", &state));
        assert!(!holds("score > 0.5", &state));
    }

    #[test]
    fn test_list_membership() {
        let state = state_with(vec![Write::append(FAILED_BRANCH, vec![json!("literature")])]);
        assert!(holds("failed_branch contains 'literature'", &state));
        assert!(holds("failed_branch != null", &state));
    }

    #[test]
    fn test_compound() {
        let state = state_with(vec![
            Write::set(SCORE, json!(0.85)),
            Write::set(CRITIQUE, json!("REJECT: weak")),
        ]);
        assert!(holds("score > 0.8 and critique contains 'REJECT'", &state));
        assert!(holds("critique contains 'ACCEPT' or score >= 0.85", &state));
        assert!(!holds("not (score > 0.8)", &state));
    }

    #[test]
    fn test_evaluation_is_pure() {
        let state = state_with(vec![Write::set(CRITIQUE, json!("ACCEPT"))]);
        let expr = parse("critique contains 'ACCEPT' and iteration < 3").unwrap();
        let first = evaluate(&expr, &state);
        let second = evaluate(&expr, &state);
        assert_eq!(first, second);
    }
}
