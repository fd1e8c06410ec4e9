// SPDX-License-Identifier: MIT

pub mod agent;
pub mod error;
pub mod llm;
pub mod message;
pub mod model;
pub mod schema;
pub mod tool;
