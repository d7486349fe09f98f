//! Resource - Representing resources and their state

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type (e.g., "flexibleengine_compute_instance_v2")
    pub resource_type: String,
    /// Resource name (identifier specified in the desired-state document)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Document address of this resource (`type.name`)
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Parse a `type.name` address
    pub fn parse_address(address: &str) -> Option<Self> {
        let (resource_type, name) = address.split_once('.')?;
        if resource_type.is_empty() || name.is_empty() || name.contains('.') {
            return None;
        }
        Some(Self::new(resource_type, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
///
/// Nested blocks are represented as a `List` of `Map` values, so that
/// `conditions.0.category` addresses the first block's `category` leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource's attribute (address `type.name`, attribute path)
    ResourceRef(String, String),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for empty strings, lists and maps
    ///
    /// Empty optional values are treated as absent by the differ and the binder.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Returns true if this value (or any nested value) is an unresolved reference
    pub fn has_reference(&self) -> bool {
        match self {
            Value::ResourceRef(_, _) => true,
            Value::List(items) => items.iter().any(Value::has_reference),
            Value::Map(map) => map.values().any(Value::has_reference),
            _ => false,
        }
    }

    /// Convert a JSON value into an attribute value
    ///
    /// `null` maps to `None`; integral numbers map to `Int`.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(Value::Float)
                }
            }
            serde_json::Value::Array(arr) => {
                Some(Value::List(arr.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(obj) => Some(Value::Map(
                obj.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Convert an attribute value into JSON
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => {
                let sorted: BTreeMap<_, _> = map.iter().collect();
                serde_json::Value::Object(
                    sorted
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                )
            }
            Value::ResourceRef(address, attr) => {
                serde_json::Value::String(format!("${{{}.{}}}", address, attr))
            }
        }
    }

    /// Flat string form used by state flattening and attribute checks
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Bool(b) => Some(b.to_string()),
            Value::ResourceRef(address, attr) => Some(format!("${{{}.{}}}", address, attr)),
            Value::List(_) | Value::Map(_) => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Look up a dotted path (`network.0.uuid`, `tags.muh`) in an attribute map
pub fn lookup<'a>(attributes: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = attributes.get(first)?;
    for segment in segments {
        current = match current {
            Value::List(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Map(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Flatten attributes into dotted keys
///
/// Lists and sets contribute a `key.#` length entry, maps a `key.%` size entry.
pub fn flatten(attributes: &HashMap<String, Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in attributes {
        flatten_value(key, value, &mut out);
    }
    out
}

fn flatten_value(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::List(items) => {
            out.insert(format!("{}.#", prefix), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_value(&format!("{}.{}", prefix, i), item, out);
            }
        }
        Value::Map(map) => {
            out.insert(format!("{}.%", prefix), map.len().to_string());
            for (k, v) in map {
                flatten_value(&format!("{}.{}", prefix, k), v, out);
            }
        }
        scalar => {
            if let Some(s) = scalar.scalar_string() {
                out.insert(prefix.to_string(), s);
            }
        }
    }
}

/// Desired state declared in a document
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
    /// If true, this is a data source (read-only) that won't be modified
    pub read_only: bool,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
            read_only: false,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Returns true if this resource is a data source (read-only)
    pub fn is_data_source(&self) -> bool {
        self.read_only
    }

    /// Addresses of resources referenced by this resource's attributes
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = Vec::new();
        for value in self.attributes.values() {
            collect_references(value, &mut deps);
        }
        deps.sort();
        deps.dedup();
        deps
    }
}

fn collect_references(value: &Value, deps: &mut Vec<String>) {
    match value {
        Value::ResourceRef(address, _) => deps.push(address.clone()),
        Value::List(items) => items.iter().for_each(|v| collect_references(v, deps)),
        Value::Map(map) => map.values().for_each(|v| collect_references(v, deps)),
        _ => {}
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Cloud identifier (e.g., a server UUID, or `policy/rule` for child objects)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
    /// Set when a create failed after the vendor assigned an identifier;
    /// the next plan replaces the object.
    pub tainted: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
            tainted: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
            tainted: false,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    /// Attribute lookup by dotted path; `id` resolves to the identifier
    pub fn get(&self, path: &str) -> Option<Value> {
        if path == "id" {
            return self.identifier.clone().map(Value::String);
        }
        lookup(&self.attributes, path).cloned()
    }

    /// Flattened attributes including `id`
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut flat = flatten(&self.attributes);
        if let Some(identifier) = &self.identifier {
            flat.insert("id".to_string(), identifier.clone());
        }
        flat
    }

    /// Serialize for the local state file
    pub fn to_json(&self) -> serde_json::Value {
        let attributes: BTreeMap<_, _> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::json!({
            "type": self.id.resource_type,
            "name": self.id.name,
            "id": self.identifier,
            "tainted": self.tainted,
            "attributes": attributes,
        })
    }

    /// Deserialize from the local state file
    pub fn from_json(value: &serde_json::Value) -> Option<State> {
        let resource_type = value.get("type")?.as_str()?;
        let name = value.get("name")?.as_str()?;
        let attributes = match value.get("attributes").and_then(Value::from_json) {
            Some(Value::Map(map)) => map,
            _ => HashMap::new(),
        };
        let mut state = State::existing(ResourceId::new(resource_type, name), attributes)
            .with_tainted(value.get("tainted").and_then(|t| t.as_bool()).unwrap_or(false));
        if let Some(identifier) = value.get("id").and_then(|v| v.as_str()) {
            state = state.with_identifier(identifier);
        }
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn lookup_nested_block_path() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "conditions".to_string(),
            Value::List(vec![block(&[("category", Value::string("url"))])]),
        );
        assert_eq!(
            lookup(&attrs, "conditions.0.category"),
            Some(&Value::string("url"))
        );
        assert_eq!(lookup(&attrs, "conditions.1.category"), None);
        assert_eq!(lookup(&attrs, "conditions.x"), None);
    }

    #[test]
    fn flatten_counts_lists_and_maps() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "tags".to_string(),
            block(&[("muh", Value::string("value-create"))]),
        );
        attrs.insert(
            "security_groups".to_string(),
            Value::List(vec![Value::string("default")]),
        );
        attrs.insert("value".to_string(), Value::Float(6.0));

        let flat = flatten(&attrs);
        assert_eq!(flat.get("tags.%").map(String::as_str), Some("1"));
        assert_eq!(flat.get("tags.muh").map(String::as_str), Some("value-create"));
        assert_eq!(flat.get("security_groups.#").map(String::as_str), Some("1"));
        assert_eq!(flat.get("security_groups.0").map(String::as_str), Some("default"));
        assert_eq!(flat.get("value").map(String::as_str), Some("6"));
    }

    #[test]
    fn json_round_trip_keeps_numbers_typed() {
        let json = serde_json::json!({"size": 1, "ratio": 0.5, "name": "x", "gone": null});
        let value = Value::from_json(&json).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("size"), Some(&Value::Int(1)));
        assert_eq!(map.get("ratio"), Some(&Value::Float(0.5)));
        assert!(!map.contains_key("gone"));
    }

    #[test]
    fn state_get_resolves_id() {
        let state = State::existing(ResourceId::new("t", "n"), HashMap::new())
            .with_identifier("abc");
        assert_eq!(state.get("id"), Some(Value::string("abc")));
    }

    #[test]
    fn parse_address() {
        let id = ResourceId::parse_address("flexibleengine_vpc_v1.main").unwrap();
        assert_eq!(id.resource_type, "flexibleengine_vpc_v1");
        assert_eq!(id.name, "main");
        assert!(ResourceId::parse_address("novalue").is_none());
    }

    #[test]
    fn resource_dependencies_are_deduplicated() {
        let resource = Resource::new("t", "n")
            .with_attribute(
                "a",
                Value::ResourceRef("vpc.main".to_string(), "id".to_string()),
            )
            .with_attribute(
                "b",
                Value::List(vec![Value::ResourceRef(
                    "vpc.main".to_string(),
                    "cidr".to_string(),
                )]),
            );
        assert_eq!(resource.dependencies(), vec!["vpc.main".to_string()]);
    }
}
