//! Nimbus Core
//!
//! The resource reconciliation contract of an infrastructure provider:
//! schemas, diffing, the CRUD state machine around vendor handlers, the
//! waiter, the quota booker and a minimal in-process host to drive them.

pub mod context;
pub mod differ;
pub mod document;
pub mod effect;
pub mod identifier;
pub mod interpreter;
pub mod kind;
pub mod plan;
pub mod provider;
pub mod quota;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod waiter;
