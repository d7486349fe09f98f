//! Argument binder
//!
//! [`Args`] reads desired attributes with typed accessors that treat empty
//! values as absent; handlers build their request structs from it.
//! [`StateBuilder`] goes the other way and writes vendor fields into an
//! attribute map, normalising identifiers, CIDRs and sets on the way.

use std::collections::{BTreeMap, HashMap};

use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::resource::{Resource, Value};
use nimbus_core::schema::canonical_cidr;

/// Typed view over desired attributes (or one nested block)
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    attributes: &'a HashMap<String, Value>,
}

impl<'a> Args<'a> {
    pub fn new(attributes: &'a HashMap<String, Value>) -> Self {
        Self { attributes }
    }

    pub fn of(resource: &'a Resource) -> Self {
        Self::new(&resource.attributes)
    }

    fn present(&self, name: &str) -> Option<&'a Value> {
        self.attributes.get(name).filter(|v| !v.is_empty())
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.present(name).and_then(Value::as_str).map(str::to_string)
    }

    pub fn require_string(&self, name: &str) -> ProviderResult<String> {
        self.get_string(name)
            .ok_or_else(|| {
                ProviderError::validation(format!("{}: required argument is missing", name))
            })
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.present(name).and_then(Value::as_int)
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.present(name).and_then(Value::as_float)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.present(name).and_then(Value::as_bool)
    }

    pub fn get_string_list(&self, name: &str) -> Vec<String> {
        self.present(name)
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sorted, deduplicated
    pub fn get_string_set(&self, name: &str) -> Vec<String> {
        let mut items = self.get_string_list(name);
        items.sort();
        items.dedup();
        items
    }

    pub fn get_string_map(&self, name: &str) -> BTreeMap<String, String> {
        self.present(name)
            .and_then(Value::as_map)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.scalar_string().map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nested blocks; a single block written as an object counts as one
    pub fn get_blocks(&self, name: &str) -> Vec<Args<'a>> {
        match self.present(name) {
            Some(Value::List(items)) => {
                items.iter().filter_map(Value::as_map).map(Args::new).collect()
            }
            Some(Value::Map(map)) => vec![Args::new(map)],
            _ => Vec::new(),
        }
    }

    pub fn get_block(&self, name: &str) -> Option<Args<'a>> {
        self.get_blocks(name).into_iter().next()
    }
}

/// Attribute map decoded from a vendor object
#[derive(Debug, Default)]
pub struct StateBuilder {
    attributes: HashMap<String, Value>,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, name: &str, value: Value) -> Self {
        if !value.is_empty() {
            self.attributes.insert(name.to_string(), value);
        }
        self
    }

    /// Empty strings are left out
    pub fn string(self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, Value::String(value.into()))
    }

    pub fn opt_string(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.string(name, value),
            None => self,
        }
    }

    /// Identifiers compare case-insensitively on the vendor side
    pub fn id(self, name: &str, value: &str) -> Self {
        self.string(name, value.to_lowercase())
    }

    pub fn cidr(self, name: &str, value: &str) -> Self {
        self.string(name, canonical_cidr(value))
    }

    pub fn int(self, name: &str, value: i64) -> Self {
        self.set(name, Value::Int(value))
    }

    pub fn float(self, name: &str, value: f64) -> Self {
        self.set(name, Value::Float(value))
    }

    pub fn bool(self, name: &str, value: bool) -> Self {
        self.set(name, Value::Bool(value))
    }

    pub fn string_list<I, S>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = values.into_iter().map(|v| Value::String(v.into())).collect();
        self.set(name, Value::List(items))
    }

    pub fn string_set<I, S>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut items: Vec<String> = values.into_iter().map(Into::into).collect();
        items.sort();
        items.dedup();
        self.string_list(name, items)
    }

    pub fn string_map(self, name: &str, values: &BTreeMap<String, String>) -> Self {
        let map = values
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.set(name, Value::Map(map))
    }

    pub fn blocks(self, name: &str, blocks: Vec<StateBuilder>) -> Self {
        let items = blocks.into_iter().map(|b| Value::Map(b.finish())).collect();
        self.set(name, Value::List(items))
    }

    pub fn block(self, name: &str, block: StateBuilder) -> Self {
        self.blocks(name, vec![block])
    }

    pub fn finish(self) -> HashMap<String, Value> {
        self.attributes
    }
}

/// Whether an update touches `name` or anything below it
pub fn touches(changed: &[String], name: &str) -> bool {
    changed.iter().any(|path| {
        path == name
            || path
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

/// Tags to set and tag keys to remove to go from `old` to `new`
pub fn tags_diff(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let set = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let remove = old
        .keys()
        .filter(|k| !new.contains_key(*k))
        .cloned()
        .collect();
    (set, remove)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> HashMap<String, Value> {
        let block = |category: &str| {
            Value::Map(HashMap::from([
                ("category".to_string(), Value::string(category)),
                ("contents".to_string(), Value::List(vec![Value::string("/login")])),
            ]))
        };
        HashMap::from([
            ("name".to_string(), Value::string("web")),
            ("description".to_string(), Value::string("")),
            ("size".to_string(), Value::Float(20.0)),
            (
                "groups".to_string(),
                Value::List(vec![Value::string("b"), Value::string("a"), Value::string("b")]),
            ),
            (
                "tags".to_string(),
                Value::Map(HashMap::from([("muh".to_string(), Value::string("kuh"))])),
            ),
            ("conditions".to_string(), Value::List(vec![block("url"), block("ip")])),
            (
                "action".to_string(),
                Value::Map(HashMap::from([(
                    "category".to_string(),
                    Value::string("block"),
                )])),
            ),
        ])
    }

    #[test]
    fn accessors_skip_empty_values() {
        let attrs = attrs();
        let args = Args::new(&attrs);
        assert_eq!(args.get_string("name").as_deref(), Some("web"));
        assert_eq!(args.get_string("description"), None);
        assert!(args.require_string("description").is_err());
        assert_eq!(args.get_int("size"), Some(20));
        assert_eq!(args.get_string_set("groups"), vec!["a", "b"]);
        assert_eq!(args.get_string_map("tags")["muh"], "kuh");
        assert!(args.get_string_map("missing").is_empty());
    }

    #[test]
    fn blocks_and_single_block_objects() {
        let attrs = attrs();
        let args = Args::new(&attrs);
        let conditions = args.get_blocks("conditions");
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].get_string("category").as_deref(), Some("ip"));
        assert_eq!(conditions[0].get_string_list("contents"), vec!["/login"]);
        assert_eq!(
            args.get_block("action").and_then(|a| a.get_string("category")).as_deref(),
            Some("block")
        );
    }

    #[test]
    fn builder_normalises() {
        let state = StateBuilder::new()
            .id("vpc_id", "AB12-CD")
            .cidr("cidr", "192.168.1.7/16")
            .string("description", "")
            .string_set("groups", ["web", "default", "web"])
            .block("action", StateBuilder::new().string("category", "log"))
            .finish();
        assert_eq!(state["vpc_id"], Value::string("ab12-cd"));
        assert_eq!(state["cidr"], Value::string("192.168.0.0/16"));
        assert!(!state.contains_key("description"));
        assert_eq!(
            state["groups"],
            Value::List(vec![Value::string("default"), Value::string("web")])
        );
        assert_eq!(
            nimbus_core::resource::lookup(&state, "action.0.category"),
            Some(&Value::string("log"))
        );
    }

    #[test]
    fn tags_diff_sets_changed_and_removes_dropped() {
        let old = BTreeMap::from([
            ("muh".to_string(), "kuh".to_string()),
            ("foo".to_string(), "bar".to_string()),
        ]);
        let new = BTreeMap::from([
            ("muh".to_string(), "value-update".to_string()),
            ("new".to_string(), "x".to_string()),
        ]);
        let (set, remove) = tags_diff(&old, &new);
        assert_eq!(set.len(), 2);
        assert_eq!(set["muh"], "value-update");
        assert_eq!(remove, vec!["foo".to_string()]);
        assert_eq!(tags_diff(&new, &new), (BTreeMap::new(), Vec::new()));
    }

    #[test]
    fn touches_matches_whole_segments() {
        let changed = vec!["metadata.foo".to_string(), "name".to_string()];
        assert!(touches(&changed, "metadata"));
        assert!(touches(&changed, "name"));
        assert!(!touches(&changed, "nam"));
        assert!(!touches(&changed, "tags"));
    }
}
