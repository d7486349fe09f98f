//! Desired-state document
//!
//! A JSON document listing resources and data sources:
//!
//! ```json
//! {
//!   "data": [{"type": "flexibleengine_compute_instance_v2", "name": "web", "attributes": {"name": "web"}}],
//!   "resources": [
//!     {"type": "flexibleengine_vpc_v1", "name": "main", "attributes": {"name": "vpc", "cidr": "192.168.0.0/16"}},
//!     {"type": "flexibleengine_vpc_subnet_v1", "name": "sub", "attributes": {"vpc_id": "${flexibleengine_vpc_v1.main.id}"}}
//!   ]
//! }
//! ```
//!
//! A string that is exactly `${<address>.<attribute path>}` references another
//! resource (`type.name`) or data source (`data.type.name`).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::resource::{Resource, Value};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'{0}' is declared twice")]
    Duplicate(String),

    #[error("invalid reference '{0}'")]
    InvalidReference(String),

    #[error("{from} references undeclared '{to}'")]
    UnknownReference { from: String, to: String },

    #[error("dependency cycle through '{0}'")]
    Cycle(String),
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    resources: Vec<RawResource>,
    #[serde(default)]
    data: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Address a resource is referenced by (`type.name`, or `data.type.name`)
pub fn address_of(resource: &Resource) -> String {
    if resource.is_data_source() {
        format!("data.{}", resource.id.address())
    } else {
        resource.id.address()
    }
}

/// Parse `${address.attr}` into a reference value
pub fn parse_reference(text: &str) -> Result<Option<Value>, DocumentError> {
    let Some(inner) = text.strip_prefix("${").and_then(|t| t.strip_suffix('}')) else {
        return Ok(None);
    };
    let parts: Vec<&str> = inner.split('.').collect();
    let split = if parts.first() == Some(&"data") { 3 } else { 2 };
    if parts.len() <= split || parts.iter().any(|p| p.is_empty()) {
        return Err(DocumentError::InvalidReference(text.to_string()));
    }
    Ok(Some(Value::ResourceRef(
        parts[..split].join("."),
        parts[split..].join("."),
    )))
}

fn convert(value: &serde_json::Value) -> Result<Option<Value>, DocumentError> {
    Ok(match value {
        serde_json::Value::String(s) => match parse_reference(s)? {
            Some(reference) => Some(reference),
            None => Some(Value::String(s.clone())),
        },
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(v) = convert(item)? {
                    out.push(v);
                }
            }
            Some(Value::List(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = HashMap::new();
            for (k, v) in map {
                if let Some(v) = convert(v)? {
                    out.insert(k.clone(), v);
                }
            }
            Some(Value::Map(out))
        }
        other => Value::from_json(other),
    })
}

/// Desired state of a set of resources and data sources
#[derive(Debug, Clone, Default)]
pub struct Document {
    resources: Vec<Resource>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource (or a read-only data source)
    pub fn with(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let raw: RawDocument = serde_json::from_str(text)?;
        let mut document = Document::new();
        let entries = raw
            .data
            .iter()
            .map(|r| (r, true))
            .chain(raw.resources.iter().map(|r| (r, false)));
        for (raw_resource, read_only) in entries {
            let mut resource = Resource::new(&raw_resource.resource_type, &raw_resource.name)
                .with_read_only(read_only);
            for (key, value) in &raw_resource.attributes {
                if let Some(v) = convert(value)? {
                    resource.attributes.insert(key.clone(), v);
                }
            }
            document.resources.push(resource);
        }
        document.check()?;
        Ok(document)
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, address: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| address_of(r) == address)
    }

    /// Check for duplicate declarations and dangling references
    pub fn check(&self) -> Result<(), DocumentError> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            let address = address_of(resource);
            if !seen.insert(address.clone()) {
                return Err(DocumentError::Duplicate(address));
            }
        }
        for resource in &self.resources {
            for dep in resource.dependencies() {
                if !seen.contains(&dep) {
                    return Err(DocumentError::UnknownReference {
                        from: address_of(resource),
                        to: dep,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resources ordered so that every resource follows what it references
    pub fn ordered(&self) -> Result<Vec<Resource>, DocumentError> {
        self.check()?;
        let by_address: HashMap<String, &Resource> = self
            .resources
            .iter()
            .map(|r| (address_of(r), r))
            .collect();

        let mut sorted = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut visiting: HashSet<String> = HashSet::new();

        fn visit(
            resource: &Resource,
            by_address: &HashMap<String, &Resource>,
            visited: &mut HashSet<String>,
            visiting: &mut HashSet<String>,
            sorted: &mut Vec<Resource>,
        ) -> Result<(), DocumentError> {
            let address = address_of(resource);
            if visited.contains(&address) {
                return Ok(());
            }
            if !visiting.insert(address.clone()) {
                return Err(DocumentError::Cycle(address));
            }
            for dep in resource.dependencies() {
                if let Some(dep_resource) = by_address.get(&dep) {
                    visit(dep_resource, by_address, visited, visiting, sorted)?;
                }
            }
            visiting.remove(&address);
            visited.insert(address);
            sorted.push(resource.clone());
            Ok(())
        }

        for resource in &self.resources {
            visit(resource, &by_address, &mut visited, &mut visiting, &mut sorted)?;
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "resources": [
            {"type": "flexibleengine_vpc_subnet_v1", "name": "sub",
             "attributes": {"name": "s", "vpc_id": "${flexibleengine_vpc_v1.main.id}",
                            "dns_list": ["100.125.0.41"]}},
            {"type": "flexibleengine_vpc_v1", "name": "main",
             "attributes": {"name": "v", "cidr": "192.168.0.0/16", "flow": null}}
        ],
        "data": [
            {"type": "flexibleengine_compute_instance_v2", "name": "web", "attributes": {"name": "web"}}
        ]
    }"#;

    #[test]
    fn parse_references_and_drop_nulls() {
        let doc = Document::parse(DOC).unwrap();
        let subnet = doc.get("flexibleengine_vpc_subnet_v1.sub").unwrap();
        assert_eq!(
            subnet.attributes.get("vpc_id"),
            Some(&Value::ResourceRef(
                "flexibleengine_vpc_v1.main".to_string(),
                "id".to_string()
            ))
        );
        let vpc = doc.get("flexibleengine_vpc_v1.main").unwrap();
        assert!(!vpc.attributes.contains_key("flow"));
        assert!(doc.get("data.flexibleengine_compute_instance_v2.web").unwrap().is_data_source());
    }

    #[test]
    fn ordered_puts_dependencies_first() {
        let doc = Document::parse(DOC).unwrap();
        let order: Vec<String> = doc.ordered().unwrap().iter().map(address_of).collect();
        let vpc = order.iter().position(|a| a == "flexibleengine_vpc_v1.main").unwrap();
        let sub = order.iter().position(|a| a == "flexibleengine_vpc_subnet_v1.sub").unwrap();
        assert!(vpc < sub);
    }

    #[test]
    fn data_source_reference_keeps_prefix() {
        let value = parse_reference("${data.flexibleengine_compute_instance_v2.web.network.0.uuid}")
            .unwrap()
            .unwrap();
        assert_eq!(
            value,
            Value::ResourceRef(
                "data.flexibleengine_compute_instance_v2.web".to_string(),
                "network.0.uuid".to_string()
            )
        );
        assert!(parse_reference("${vpc.main}").is_err());
        assert_eq!(parse_reference("plain").unwrap(), None);
    }

    #[test]
    fn undeclared_reference_and_cycle_are_rejected() {
        let dangling = Document::new().with(Resource::new("a_b_c", "x").with_attribute(
            "ref",
            Value::ResourceRef("a_b_d.y".to_string(), "id".to_string()),
        ));
        assert!(matches!(
            dangling.check(),
            Err(DocumentError::UnknownReference { .. })
        ));

        let cyclic = Document::new()
            .with(Resource::new("t", "x").with_attribute(
                "r",
                Value::ResourceRef("t.y".to_string(), "id".to_string()),
            ))
            .with(Resource::new("t", "y").with_attribute(
                "r",
                Value::ResourceRef("t.x".to_string(), "id".to_string()),
            ));
        assert!(matches!(cyclic.ordered(), Err(DocumentError::Cycle(_))));
    }
}
