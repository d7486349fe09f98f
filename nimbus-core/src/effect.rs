//! Effect - A single side effect the interpreter performs against a provider

use crate::resource::{Resource, ResourceId, State};

/// Side effect to be executed by the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Read a data source
    Read(Resource),
    /// Create a resource
    Create(Resource),
    /// Update a resource in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed: Vec<String>,
    },
    /// Delete then create a resource
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed: Vec<String>,
    },
    /// Delete a resource
    Delete(State),
}

impl Effect {
    /// Returns true if this effect changes infrastructure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read(_))
    }

    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Read(r) | Effect::Create(r) => &r.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } => id,
            Effect::Delete(state) => &state.id,
        }
    }
}
