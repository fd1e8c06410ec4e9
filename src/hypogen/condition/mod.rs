// SPDX-License-Identifier: MIT

//! Condition expressions for conditional edges
//!
//! Conditions are simple expressions over blackboard channels:
//! - `critique contains 'ACCEPT'`
//! - `iteration >= 3`
//! - `score > 0.8 and failed_branch == null`
//! - `not (critique contains 'REJECT')`

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::parse;
