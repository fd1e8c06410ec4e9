// SPDX-License-Identifier: MIT

//! Built-in tools
//!
//! - [literature] - PubMed search returning structured citations

pub mod literature;

use crate::adk::error::ToolError;
use crate::adk::tool::ToolRegistry;
use std::sync::Arc;

pub use literature::PubMedSearchTool;

/// Registry holding every built-in tool
pub fn default_registry() -> Result<ToolRegistry, ToolError> {
    Ok(ToolRegistry::new().with(Arc::new(PubMedSearchTool::new()?)))
}
