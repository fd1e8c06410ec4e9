// SPDX-License-Identifier: MIT

//! Conditional-edge selectors
//!
//! A selector is a pure function of the blackboard that picks exactly one
//! successor from a declared set.

use super::types::RouteDef;
use crate::hypogen::condition::{self, Expression};
use crate::hypogen::error::ConditionError;
use crate::hypogen::state::schema::{CRITIQUE, FAILED_BRANCH, ITERATION};
use crate::hypogen::state::Blackboard;

/// Verdict token that ends a refinement loop
pub const ACCEPT_TOKEN: &str = "ACCEPT";

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub when: Expression,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// First route whose condition holds, else `default`
    Routes { routes: Vec<Route>, default: String },
    /// Refinement gate: leave the loop on ACCEPT, on the iteration cap, or
    /// once any branch has failed
    Gate {
        accept: String,
        revise: String,
        max_iterations: u64,
    },
}

impl Selector {
    pub fn routes(routes: &[RouteDef], default: &str) -> Result<Self, ConditionError> {
        let routes = routes
            .iter()
            .map(|r| {
                Ok(Route {
                    when: condition::parse(&r.when)?,
                    to: r.to.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConditionError>>()?;
        Ok(Selector::Routes {
            routes,
            default: default.to_string(),
        })
    }

    pub fn gate(accept: &str, revise: &str, max_iterations: u64) -> Self {
        Selector::Gate {
            accept: accept.to_string(),
            revise: revise.to_string(),
            max_iterations,
        }
    }

    /// Every target the selector may return, without duplicates
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let mut push = |t| {
            if !out.contains(&t) {
                out.push(t);
            }
        };
        match self {
            Selector::Routes { routes, default } => {
                for route in routes {
                    push(route.to.as_str());
                }
                push(default.as_str());
            }
            Selector::Gate { accept, revise, .. } => {
                push(accept.as_str());
                push(revise.as_str());
            }
        }
        out
    }

    /// A gate's revise edge is the only edge allowed to close a cycle
    pub fn is_bounded(&self) -> bool {
        matches!(self, Selector::Gate { .. })
    }

    /// Channels the selector inspects
    pub fn channels(&self) -> Vec<&str> {
        match self {
            Selector::Routes { routes, .. } => {
                let mut out: Vec<&str> = Vec::new();
                for route in routes {
                    for channel in route.when.channels() {
                        if !out.contains(&channel) {
                            out.push(channel);
                        }
                    }
                }
                out
            }
            Selector::Gate { .. } => vec![CRITIQUE, ITERATION, FAILED_BRANCH],
        }
    }

    pub fn select(&self, state: &Blackboard) -> &str {
        match self {
            Selector::Routes { routes, default } => routes
                .iter()
                .find(|r| condition::evaluate(&r.when, state))
                .map(|r| r.to.as_str())
                .unwrap_or(default.as_str()),
            Selector::Gate {
                accept,
                revise,
                max_iterations,
            } => {
                let accepted = state
                    .text(CRITIQUE)
                    .map(|c| c.contains(ACCEPT_TOKEN))
                    .unwrap_or(false);
                let capped = state.count(ITERATION) >= *max_iterations;
                let failed = !state.list(FAILED_BRANCH).is_empty();
                if accepted || capped || failed {
                    accept
                } else {
                    revise
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn gate(max: u64) -> Selector {
        Selector::gate("summarizer", "refiner", max)
    }

    #[test]
    fn test_gate_revises_until_accept() {
        let state = state_with(vec![
            Write::set(CRITIQUE, json!("REJECT: weak mechanism")),
            Write::increment(ITERATION),
        ]);
        assert_eq!(gate(3).select(&state), "refiner");

        let state = state_with(vec![
            Write::set(CRITIQUE, json!("Verdict: ACCEPT")),
            Write::increment(ITERATION),
        ]);
        assert_eq!(gate(3).select(&state), "summarizer");
    }

    #[test]
    fn test_gate_respects_cap() {
        let state = state_with(vec![
            Write::set(CRITIQUE, json!("REJECT")),
            Write::set(ITERATION, json!(3)),
        ]);
        assert_eq!(gate(3).select(&state), "summarizer");
        assert_eq!(gate(0).select(&state_with(vec![])), "summarizer");
    }

    #[test]
    fn test_gate_leaves_on_failed_branch() {
        let state = state_with(vec![Write::append(FAILED_BRANCH, vec![json!("literature")])]);
        assert_eq!(gate(3).select(&state), "summarizer");
    }

    #[test]
    fn test_routes_first_match_wins() {
        let selector = Selector::routes(
            &[
                RouteDef {
                    when: "score >= 0.9".to_string(),
                    to: "summarizer".to_string(),
                },
                RouteDef {
                    when: "score >= 0.5".to_string(),
                    to: "refiner".to_string(),
                },
            ],
            "generator",
        )
        .unwrap();

        assert_eq!(selector.targets(), vec!["summarizer", "refiner", "generator"]);
        assert_eq!(
            selector.select(&state_with(vec![Write::set("score", json!(0.95))])),
            "summarizer"
        );
        assert_eq!(
            selector.select(&state_with(vec![Write::set("score", json!(0.6))])),
            "refiner"
        );
        assert_eq!(selector.select(&state_with(vec![])), "generator");
    }

    #[test]
    fn test_selector_is_pure() {
        let state = state_with(vec![Write::set(CRITIQUE, json!("REJECT"))]);
        let selector = gate(2);
        assert_eq!(selector.select(&state), selector.select(&state));
    }

    #[test]
    fn test_invalid_route_condition() {
        let err = Selector::routes(
            &[RouteDef {
                when: "nonsense here".to_string(),
                to: "x".to_string(),
            }],
            "y",
        )
        .unwrap_err();
        assert!(matches!(err, ConditionError::Syntax(_)));
    }
}
