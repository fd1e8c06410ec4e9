// SPDX-License-Identifier: MIT

//! Blackboard state for hypothesis workflows
//!
//! This module provides:
//! - `StateSchema` - named channels with a merge kind and a value type
//! - `Blackboard` - runtime storage that applies writes under those kinds
//! - `Reference` - the canonical citation shape for the `references` channel

mod reference;
pub mod schema;
mod store;

pub use crate::adk::agent::{StateUpdate, Write};
pub use reference::{citation_key, Reference};
pub use schema::{ChannelDef, ChannelKind, FieldType, StateSchema};
pub use store::Blackboard;
