//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the desired state with the state last read from the vendor and
//! decides between create, update-in-place, replace and no-op. The decision
//! is driven entirely by the resource schema: computed-only attributes never
//! participate, and a changed path under a force-new attribute (or anywhere
//! inside a force-new block) turns the update into a replacement.

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema, sort_values};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences that can be applied in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists but a force-new path changed (or it is tainted)
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

/// Decision of a diff, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    UpdateInPlace,
    Replace,
    NoOp,
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }

    pub fn action(&self) -> Action {
        match self {
            Diff::Create(_) => Action::Create,
            Diff::Update { .. } => Action::UpdateInPlace,
            Diff::Replace { .. } => Action::Replace,
            Diff::NoChange(_) => Action::NoOp,
        }
    }

    pub fn changed_paths(&self) -> &[String] {
        match self {
            Diff::Update {
                changed_attributes, ..
            }
            | Diff::Replace {
                changed_attributes, ..
            } => changed_attributes,
            _ => &[],
        }
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(schema: &ResourceSchema, desired: &Resource, current: &State) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let desired_attrs = schema.apply_defaults(&desired.attributes);
    let mut changes = Changes::default();
    compare_attributes(
        &schema.attributes,
        "",
        &desired_attrs,
        &current.attributes,
        false,
        &mut changes,
    );

    if current.tainted || changes.force_new {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changes.paths,
        }
    } else if changes.paths.is_empty() {
        Diff::NoChange(desired.id.clone())
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changes.paths,
        }
    }
}

#[derive(Default)]
struct Changes {
    paths: Vec<String>,
    force_new: bool,
}

impl Changes {
    fn record(&mut self, path: String, force_new: bool) {
        self.paths.push(path);
        self.force_new |= force_new;
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_empty())
}

fn compare_attributes(
    schema: &std::collections::BTreeMap<String, AttributeSchema>,
    prefix: &str,
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    inherited_force: bool,
    changes: &mut Changes,
) {
    for (name, attr) in schema {
        if attr.is_computed_only() {
            continue;
        }
        let path = join(prefix, name);
        let force = inherited_force || attr.force_new;

        match (present(desired.get(name)), present(current.get(name))) {
            (None, None) => {}
            // Optional+computed attributes left unset keep the vendor's choice
            (None, Some(_)) if attr.computed => {}
            (None, Some(_)) => changes.record(path, force),
            (Some(d), c) => compare_value(attr, &path, d, c, force, changes),
        }
    }
}

fn compare_value(
    attr: &AttributeSchema,
    path: &str,
    desired: &Value,
    current: Option<&Value>,
    force: bool,
    changes: &mut Changes,
) {
    // Unresolved references are unknown until apply
    if desired.has_reference() {
        changes.record(path.to_string(), force);
        return;
    }
    let Some(current) = current else {
        changes.record(path.to_string(), force);
        return;
    };

    match &attr.attr_type {
        AttributeType::Block(block) => {
            let desired_items = as_blocks(desired);
            let current_items = as_blocks(current);
            if desired_items.len() != current_items.len() {
                changes.record(format!("{}.#", path), force);
                return;
            }
            for (i, (d, c)) in desired_items.iter().zip(current_items.iter()).enumerate() {
                compare_attributes(
                    &block.attributes,
                    &format!("{}.{}", path, i),
                    d,
                    c,
                    force,
                    changes,
                );
            }
        }
        AttributeType::Map(_) => {
            let (Some(d), Some(c)) = (desired.as_map(), current.as_map()) else {
                changes.record(path.to_string(), force);
                return;
            };
            let mut keys: Vec<&String> = d
                .keys()
                .chain(c.keys())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            keys.sort();
            for key in keys {
                if !scalar_eq(d.get(key), c.get(key)) {
                    changes.record(format!("{}.{}", path, key), force);
                }
            }
        }
        AttributeType::Set(_) => {
            let mut d = desired.as_list().map(<[Value]>::to_vec).unwrap_or_default();
            let mut c = current.as_list().map(<[Value]>::to_vec).unwrap_or_default();
            sort_values(&mut d);
            sort_values(&mut c);
            if !list_eq(&d, &c) {
                changes.record(path.to_string(), force);
            }
        }
        AttributeType::List(_) => {
            let d = desired.as_list().unwrap_or_default();
            let c = current.as_list().unwrap_or_default();
            if !list_eq(d, c) {
                changes.record(path.to_string(), force);
            }
        }
        _ => {
            if !scalar_eq(Some(desired), Some(current)) {
                changes.record(path.to_string(), force);
            }
        }
    }
}

fn as_blocks(value: &Value) -> Vec<HashMap<String, Value>> {
    match value {
        Value::List(items) => items
            .iter()
            .filter_map(|item| item.as_map().cloned())
            .collect(),
        Value::Map(map) => vec![map.clone()],
        _ => Vec::new(),
    }
}

fn list_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| scalar_eq(Some(x), Some(y)))
}

/// Equality that treats `Int(6)` and `Float(6.0)` as equal
fn scalar_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(Value::Int(_) | Value::Float(_)), Some(Value::Int(_) | Value::Float(_))) => {
            a.and_then(Value::as_float) == b.and_then(Value::as_float)
        }
        (Some(x), Some(y)) => x == y,
        (None, None) => true,
        (Some(x), None) | (None, Some(x)) => x.is_empty(),
    }
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Resources present in `current_states` but absent from `desired` are
/// deleted, in reverse order of their appearance in the state.
pub fn create_plan<'a>(
    schema_for: impl Fn(&str) -> Option<&'a ResourceSchema>,
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        if resource.is_data_source() {
            plan.add(Effect::Read(resource.clone()));
            continue;
        }
        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let Some(schema) = schema_for(&resource.id.resource_type) else {
            plan.add(Effect::Create(resource.clone()));
            continue;
        };

        match diff(schema, resource, &current) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed: changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                id,
                from,
                to,
                changed: changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let wanted: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !wanted.contains(&s.id))
        .collect();
    orphans.sort_by(|a, b| b.id.cmp(&a.id));
    for state in orphans {
        plan.add(Effect::Delete(state.clone()));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BlockSchema, types};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("instance")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()).optional())
            .attribute(AttributeSchema::new("security_groups", types::string_set()).optional())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("stop_before_destroy", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(false)),
            )
            .attribute(
                AttributeSchema::new(
                    "network",
                    AttributeType::block(
                        BlockSchema::new()
                            .attribute(
                                AttributeSchema::new("uuid", AttributeType::String).optional(),
                            ),
                    ),
                )
                .optional()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "condition",
                    AttributeType::block(
                        BlockSchema::new()
                            .max_items(1)
                            .attribute(
                                AttributeSchema::new("value", AttributeType::Float).required(),
                            ),
                    ),
                )
                .optional(),
            )
    }

    fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn current(pairs: &[(&str, Value)]) -> State {
        State::existing(ResourceId::new("instance", "a"), map(pairs)).with_identifier("srv-1")
    }

    fn desired(pairs: &[(&str, Value)]) -> Resource {
        let mut r = Resource::new("instance", "a");
        r.attributes = map(pairs);
        r
    }

    #[test]
    fn diff_create_when_not_exists() {
        let result = diff(
            &schema(),
            &desired(&[]),
            &State::not_found(ResourceId::new("instance", "a")),
        );
        assert_eq!(result.action(), Action::Create);
    }

    #[test]
    fn no_change_ignores_computed_and_defaults() {
        let result = diff(
            &schema(),
            &desired(&[("name", Value::string("instance_1"))]),
            &current(&[
                ("name", Value::string("instance_1")),
                ("availability_zone", Value::string("eu-west-0a")),
                ("status", Value::string("ACTIVE")),
                ("stop_before_destroy", Value::Bool(false)),
            ]),
        );
        assert_eq!(result.action(), Action::NoOp);
    }

    #[test]
    fn map_changes_are_reported_per_key() {
        let result = diff(
            &schema(),
            &desired(&[
                ("name", Value::string("instance_2")),
                ("tags", Value::Map(map(&[("muh", Value::string("value-update"))]))),
            ]),
            &current(&[
                ("name", Value::string("instance_1")),
                (
                    "tags",
                    Value::Map(map(&[
                        ("muh", Value::string("value-create")),
                        ("kuh", Value::string("value-create")),
                    ])),
                ),
                ("stop_before_destroy", Value::Bool(false)),
            ]),
        );
        assert_eq!(result.action(), Action::UpdateInPlace);
        assert_eq!(result.changed_paths(), &["name", "tags.kuh", "tags.muh"]);
    }

    #[test]
    fn force_new_attribute_triggers_replace() {
        let result = diff(
            &schema(),
            &desired(&[
                ("name", Value::string("instance_1")),
                ("availability_zone", Value::string("eu-west-0b")),
            ]),
            &current(&[
                ("name", Value::string("instance_1")),
                ("availability_zone", Value::string("eu-west-0a")),
                ("stop_before_destroy", Value::Bool(false)),
            ]),
        );
        assert_eq!(result.action(), Action::Replace);
    }

    #[test]
    fn leaf_change_inside_force_new_block_triggers_replace() {
        let net = |uuid: &str| Value::List(vec![Value::Map(map(&[("uuid", Value::string(uuid))]))]);
        let result = diff(
            &schema(),
            &desired(&[("name", Value::string("i")), ("network", net("net-2"))]),
            &current(&[
                ("name", Value::string("i")),
                ("network", net("net-1")),
                ("stop_before_destroy", Value::Bool(false)),
            ]),
        );
        assert_eq!(result.action(), Action::Replace);
        assert_eq!(result.changed_paths(), &["network.0.uuid"]);
    }

    #[test]
    fn sets_compare_without_order_and_numbers_loosely() {
        let result = diff(
            &schema(),
            &desired(&[
                ("name", Value::string("i")),
                (
                    "security_groups",
                    Value::List(vec![Value::string("web"), Value::string("default")]),
                ),
                (
                    "condition",
                    Value::List(vec![Value::Map(map(&[("value", Value::Int(6))]))]),
                ),
            ]),
            &current(&[
                ("name", Value::string("i")),
                (
                    "security_groups",
                    Value::List(vec![Value::string("default"), Value::string("web")]),
                ),
                (
                    "condition",
                    Value::List(vec![Value::Map(map(&[("value", Value::Float(6.0))]))]),
                ),
                ("stop_before_destroy", Value::Bool(false)),
            ]),
        );
        assert_eq!(result.action(), Action::NoOp);
    }

    #[test]
    fn tainted_state_is_replaced() {
        let result = diff(
            &schema(),
            &desired(&[("name", Value::string("i"))]),
            &current(&[("name", Value::string("i")), ("stop_before_destroy", Value::Bool(false))])
                .with_tainted(true),
        );
        assert_eq!(result.action(), Action::Replace);
    }

    #[test]
    fn create_plan_from_resources() {
        let s = schema();
        let resources = vec![
            Resource::new("instance", "new").with_attribute("name", Value::string("n")),
            Resource::new("instance", "existing").with_attribute("name", Value::string("x2")),
        ];

        let mut current_states = HashMap::new();
        current_states.insert(
            ResourceId::new("instance", "existing"),
            State::existing(
                ResourceId::new("instance", "existing"),
                map(&[("name", Value::string("x1"))]),
            ),
        );
        current_states.insert(
            ResourceId::new("instance", "orphan"),
            State::existing(ResourceId::new("instance", "orphan"), HashMap::new()),
        );

        let plan = create_plan(|_| Some(&s), &resources, &current_states);

        assert_eq!(plan.effects().len(), 3);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Update { .. }));
        assert!(matches!(plan.effects()[2], Effect::Delete(_)));
    }
}
