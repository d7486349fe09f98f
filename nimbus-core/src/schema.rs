//! Schema - Define typed schemas for resources
//!
//! Every resource kind declares one `ResourceSchema`. That single declaration
//! drives validation, default application, diffing, decode filtering,
//! preservation of write-only values and the generated documentation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use regex::Regex;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Floating point number (integers are accepted)
    Float,
    /// Boolean
    Bool,
    /// Ordered list
    List(Box<AttributeType>),
    /// Unordered collection, compared and stored in sorted order
    Set(Box<AttributeType>),
    /// Map from string keys
    Map(Box<AttributeType>),
    /// Nested block(s), stored as a list of maps
    Block(Box<BlockSchema>),
}

impl AttributeType {
    pub fn list(inner: AttributeType) -> Self {
        AttributeType::List(Box::new(inner))
    }

    pub fn set(inner: AttributeType) -> Self {
        AttributeType::Set(Box::new(inner))
    }

    pub fn map(inner: AttributeType) -> Self {
        AttributeType::Map(Box::new(inner))
    }

    pub fn block(block: BlockSchema) -> Self {
        AttributeType::Block(Box::new(block))
    }

    /// Check if a value conforms to this type, collecting errors with their path
    fn check(
        &self,
        path: &str,
        value: &Value,
        validators: &[Validator],
        errors: &mut Vec<ValidationError>,
    ) {
        match (self, value) {
            // References resolve at apply time; their target type is checked then
            (_, Value::ResourceRef(_, _)) => {}
            (AttributeType::String, Value::String(_))
            | (AttributeType::Int, Value::Int(_))
            | (AttributeType::Bool, Value::Bool(_))
            | (AttributeType::Float, Value::Float(_) | Value::Int(_)) => {
                for validator in validators {
                    if let Err(message) = validator.check(value) {
                        errors.push(ValidationError::new(
                            path,
                            TypeError::ValidationFailed { message },
                        ));
                    }
                }
            }
            (AttributeType::List(inner) | AttributeType::Set(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.check(&format!("{}.{}", path, i), item, validators, errors);
                }
            }
            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.check(&format!("{}.{}", path, k), v, validators, errors);
                }
            }
            (AttributeType::Block(block), Value::List(items)) => {
                if items.len() < block.min_items
                    || (block.max_items > 0 && items.len() > block.max_items)
                {
                    errors.push(ValidationError::new(
                        path,
                        TypeError::BlockCardinality {
                            min: block.min_items,
                            max: block.max_items,
                            got: items.len(),
                        },
                    ));
                }
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}.{}", path, i);
                    match item {
                        Value::Map(map) => block.check(&item_path, map, errors),
                        other => errors.push(ValidationError::new(
                            &item_path,
                            TypeError::TypeMismatch {
                                expected: "Block".to_string(),
                                got: other.type_name(),
                            },
                        )),
                    }
                }
            }
            // A single block may be written as an object
            (AttributeType::Block(_), Value::Map(map)) => {
                self.check(path, &Value::List(vec![Value::Map(map.clone())]), validators, errors);
            }
            _ => errors.push(ValidationError::new(
                path,
                TypeError::TypeMismatch {
                    expected: self.type_name(),
                    got: value.type_name(),
                },
            )),
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Float => "Float".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Set(inner) => format!("Set<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }

    fn accepts_default(&self, value: &Value) -> bool {
        let mut errors = Vec::new();
        self.check("default", value, &[], &mut errors);
        errors.is_empty()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Pure, total value validators
#[derive(Debug, Clone)]
pub enum Validator {
    StringLenBetween(usize, usize),
    RegexMatch { pattern: String, message: String },
    StringIn(Vec<String>),
    IntBetween(i64, i64),
    IntIn(Vec<i64>),
    FloatBetween(f64, f64),
    Cidr,
    IpAddress,
    Custom {
        name: &'static str,
        check: fn(&Value) -> Result<(), String>,
    },
}

impl Validator {
    pub fn regex(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Validator::RegexMatch {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    pub fn string_in(values: &[&str]) -> Self {
        Validator::StringIn(values.iter().map(|s| s.to_string()).collect())
    }

    /// Accept or reject a scalar value with a human-readable reason
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Validator::StringLenBetween(min, max), Value::String(s)) => {
                let len = s.chars().count();
                if len < *min || len > *max {
                    Err(format!(
                        "expected length between {} and {}, got {}",
                        min, max, len
                    ))
                } else {
                    Ok(())
                }
            }
            (Validator::RegexMatch { pattern, message }, Value::String(s)) => {
                let re = Regex::new(pattern)
                    .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(message.clone())
                }
            }
            (Validator::StringIn(allowed), Value::String(s)) => {
                if allowed.iter().any(|a| a == s) {
                    Ok(())
                } else {
                    Err(format!(
                        "expected one of [{}], got '{}'",
                        allowed.join(", "),
                        s
                    ))
                }
            }
            (Validator::IntBetween(min, max), Value::Int(n)) => {
                if n < min || n > max {
                    Err(format!("expected value between {} and {}, got {}", min, max, n))
                } else {
                    Ok(())
                }
            }
            (Validator::IntIn(allowed), Value::Int(n)) => {
                if allowed.contains(n) {
                    Ok(())
                } else {
                    let allowed: Vec<String> = allowed.iter().map(|a| a.to_string()).collect();
                    Err(format!("expected one of [{}], got {}", allowed.join(", "), n))
                }
            }
            (Validator::FloatBetween(min, max), Value::Float(_) | Value::Int(_)) => {
                let f = value.as_float().unwrap_or_default();
                if f < *min || f > *max {
                    Err(format!("expected value between {} and {}, got {}", min, max, f))
                } else {
                    Ok(())
                }
            }
            (Validator::Cidr, Value::String(s)) => validate_cidr(s),
            (Validator::IpAddress, Value::String(s)) => s
                .parse::<IpAddr>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a valid IP address", s)),
            (Validator::Custom { check, .. }, v) => check(v),
            (validator, v) => Err(format!(
                "validator {} cannot be applied to {}",
                validator.name(),
                v.type_name()
            )),
        }
    }

    fn name(&self) -> String {
        match self {
            Validator::StringLenBetween(min, max) => format!("length({}..={})", min, max),
            Validator::RegexMatch { pattern, .. } => format!("regex({})", pattern),
            Validator::StringIn(values) => format!("one_of({})", values.join("|")),
            Validator::IntBetween(min, max) => format!("range({}..={})", min, max),
            Validator::IntIn(values) => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("one_of({})", values.join("|"))
            }
            Validator::FloatBetween(min, max) => format!("range({}..={})", min, max),
            Validator::Cidr => "cidr".to_string(),
            Validator::IpAddress => "ip_address".to_string(),
            Validator::Custom { name, .. } => name.to_string(),
        }
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute is missing")]
    MissingRequired,

    #[error("Unknown attribute")]
    UnknownAttribute,

    #[error("Attribute is computed and cannot be set")]
    ComputedOnly,

    #[error("Expected between {min} and {max} blocks, got {got}")]
    BlockCardinality { min: usize, max: usize, got: usize },
}

/// A validation failure at a dotted attribute path
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {error}")]
pub struct ValidationError {
    pub path: String,
    pub error: TypeError,
}

impl ValidationError {
    pub fn new(path: &str, error: TypeError) -> Self {
        Self {
            path: path.to_string(),
            error,
        }
    }
}

/// Invalid schema definition, detected at provider init
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaDefinitionError {
    #[error("{resource}.{attribute}: exactly one of required/optional must be set unless computed-only")]
    InvalidPresence { resource: String, attribute: String },

    #[error("{resource}.{attribute}: required attribute cannot have a default")]
    RequiredWithDefault { resource: String, attribute: String },

    #[error("{resource}.{attribute}: default does not match type {expected}")]
    DefaultTypeMismatch {
        resource: String,
        attribute: String,
        expected: String,
    },

    #[error("{resource}.{attribute}: invalid regex '{pattern}'")]
    InvalidRegex {
        resource: String,
        attribute: String,
        pattern: String,
    },

    #[error("{resource}.{attribute}: block min_items {min} exceeds max_items {max}")]
    InvalidCardinality {
        resource: String,
        attribute: String,
        min: usize,
        max: usize,
    },
}

impl Value {
    pub(crate) fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Float(_) => "Float".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::ResourceRef(binding, attr) => format!("ResourceRef({}.{})", binding, attr),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// A change to this attribute requires destroy-then-create
    pub force_new: bool,
    /// Value is kept from the desired state and never re-read
    pub sensitive: bool,
    /// The vendor accepts the value but never echoes it back on read
    pub write_only: bool,
    pub default: Option<Value>,
    pub validators: Vec<Validator>,
    pub description: Option<String>,
    /// Vendor-side property name (e.g., "flavorRef")
    pub provider_name: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            write_only: false,
            default: None,
            validators: Vec::new(),
            description: None,
            provider_name: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    /// Computed and neither required nor optional
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.required && !self.optional
    }

    /// Value survives from the prior state instead of being read back
    pub fn is_preserved(&self) -> bool {
        self.sensitive || self.write_only
    }

    fn check_definition(&self, resource: &str) -> Result<(), SchemaDefinitionError> {
        let attribute = self.name.clone();
        if self.required == self.optional && !self.is_computed_only() {
            return Err(SchemaDefinitionError::InvalidPresence {
                resource: resource.to_string(),
                attribute,
            });
        }
        if self.required && self.default.is_some() {
            return Err(SchemaDefinitionError::RequiredWithDefault {
                resource: resource.to_string(),
                attribute,
            });
        }
        if let Some(default) = &self.default
            && !self.attr_type.accepts_default(default)
        {
            return Err(SchemaDefinitionError::DefaultTypeMismatch {
                resource: resource.to_string(),
                attribute,
                expected: self.attr_type.type_name(),
            });
        }
        for validator in &self.validators {
            if let Validator::RegexMatch { pattern, .. } = validator
                && Regex::new(pattern).is_err()
            {
                return Err(SchemaDefinitionError::InvalidRegex {
                    resource: resource.to_string(),
                    attribute,
                    pattern: pattern.clone(),
                });
            }
        }
        if let AttributeType::Block(block) = &self.attr_type {
            if block.max_items > 0 && block.min_items > block.max_items {
                return Err(SchemaDefinitionError::InvalidCardinality {
                    resource: resource.to_string(),
                    attribute,
                    min: block.min_items,
                    max: block.max_items,
                });
            }
            let nested = format!("{}.{}", resource, self.name);
            for attr in block.attributes.values() {
                attr.check_definition(&nested)?;
            }
        }
        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        let mut doc = serde_json::json!({
            "type": self.attr_type.type_name(),
            "required": self.required,
            "optional": self.optional,
            "computed": self.computed,
        });
        if self.force_new {
            doc["force_new"] = serde_json::Value::Bool(true);
        }
        if self.sensitive {
            doc["sensitive"] = serde_json::Value::Bool(true);
        }
        if let Some(default) = &self.default {
            doc["default"] = default.to_json();
        }
        if let Some(desc) = &self.description {
            doc["description"] = serde_json::Value::String(desc.clone());
        }
        if !self.validators.is_empty() {
            doc["validators"] = serde_json::Value::Array(
                self.validators
                    .iter()
                    .map(|v| serde_json::Value::String(v.name()))
                    .collect(),
            );
        }
        if let AttributeType::Block(block) = &self.attr_type {
            doc["min_items"] = serde_json::Value::from(block.min_items);
            doc["max_items"] = serde_json::Value::from(block.max_items);
            doc["block"] = block.to_json();
        }
        doc
    }
}

/// Nested block schema
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub min_items: usize,
    /// Zero means unbounded
    pub max_items: usize,
}

impl BlockSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = min;
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    fn check(
        &self,
        path: &str,
        attributes: &HashMap<String, Value>,
        errors: &mut Vec<ValidationError>,
    ) {
        check_attributes(&self.attributes, path, attributes, errors);
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.to_json()))
                .collect(),
        )
    }
}

fn check_attributes(
    schema: &BTreeMap<String, AttributeSchema>,
    prefix: &str,
    attributes: &HashMap<String, Value>,
    errors: &mut Vec<ValidationError>,
) {
    let join = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        }
    };

    for (name, attr) in schema {
        let present = attributes.get(name).is_some_and(|v| !v.is_empty());
        if attr.required && !present {
            errors.push(ValidationError::new(&join(name), TypeError::MissingRequired));
        }
    }

    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();
    for name in names {
        let value = &attributes[name];
        match schema.get(name) {
            None => errors.push(ValidationError::new(&join(name), TypeError::UnknownAttribute)),
            Some(attr) if attr.is_computed_only() => {
                errors.push(ValidationError::new(&join(name), TypeError::ComputedOnly))
            }
            Some(attr) => attr
                .attr_type
                .check(&join(name), value, &attr.validators, errors),
        }
    }
}

fn apply_defaults_to(
    schema: &BTreeMap<String, AttributeSchema>,
    attributes: &mut HashMap<String, Value>,
) {
    for (name, attr) in schema {
        match attributes.get_mut(name) {
            None => {
                if let Some(default) = &attr.default {
                    attributes.insert(name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let AttributeType::Block(block) = &attr.attr_type {
                    normalize_single_block(value);
                    if let Value::List(items) = value {
                        for item in items.iter_mut() {
                            if let Value::Map(map) = item {
                                apply_defaults_to(&block.attributes, map);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// A single block written as an object becomes a one-element list
fn normalize_single_block(value: &mut Value) {
    if let Value::Map(map) = value {
        *value = Value::List(vec![Value::Map(std::mem::take(map))]);
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Validate resource attributes
    pub fn validate(
        &self,
        attributes: &HashMap<String, Value>,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        check_attributes(&self.attributes, "", attributes, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill absent optional attributes with their defaults, recursively
    pub fn apply_defaults(&self, attributes: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut out = attributes.clone();
        apply_defaults_to(&self.attributes, &mut out);
        out
    }

    /// Validate the schema definition itself
    pub fn check(&self) -> Result<(), SchemaDefinitionError> {
        for attr in self.attributes.values() {
            attr.check_definition(&self.resource_type)?;
        }
        Ok(())
    }

    /// Keep only declared attributes, sorting set values
    pub fn retain_declared(&self, attributes: HashMap<String, Value>) -> HashMap<String, Value> {
        retain_declared_in(&self.attributes, attributes)
    }

    /// Render the schema as documentation JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.resource_type,
            "description": self.description,
            "attributes": serde_json::Value::Object(
                self.attributes
                    .iter()
                    .map(|(name, attr)| (name.clone(), attr.to_json()))
                    .collect(),
            ),
        })
    }
}

fn retain_declared_in(
    schema: &BTreeMap<String, AttributeSchema>,
    attributes: HashMap<String, Value>,
) -> HashMap<String, Value> {
    attributes
        .into_iter()
        .filter_map(|(name, value)| {
            let attr = schema.get(&name)?;
            let value = match (&attr.attr_type, value) {
                (AttributeType::Set(_), Value::List(mut items)) => {
                    sort_values(&mut items);
                    Value::List(items)
                }
                (AttributeType::Block(block), Value::List(items)) => Value::List(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::Map(map) => {
                                Value::Map(retain_declared_in(&block.attributes, map))
                            }
                            other => other,
                        })
                        .collect(),
                ),
                (_, value) => value,
            };
            Some((name, value))
        })
        .collect()
}

/// Stable order for set elements
pub fn sort_values(items: &mut [Value]) {
    items.sort_by(|a, b| {
        let a = a.scalar_string().unwrap_or_else(|| a.to_json().to_string());
        let b = b.scalar_string().unwrap_or_else(|| b.to_json().to_string());
        a.cmp(&b)
    });
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Tags / metadata map of strings
    pub fn string_map() -> AttributeType {
        AttributeType::map(AttributeType::String)
    }

    pub fn string_list() -> AttributeType {
        AttributeType::list(AttributeType::String)
    }

    pub fn string_set() -> AttributeType {
        AttributeType::set(AttributeType::String)
    }
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    parse_cidr(cidr).map(|_| ())
}

fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), String> {
    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid CIDR format '{}': expected IP/prefix",
            cidr
        ));
    }

    let ip = parts[0];
    let prefix = parts[1];

    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(format!("Invalid IP address '{}': expected 4 octets", ip));
    }

    for octet in &octets {
        if octet.parse::<u8>().is_err() {
            return Err(format!(
                "Invalid octet '{}' in IP address: must be 0-255",
                octet
            ));
        }
    }
    let addr: Ipv4Addr = ip
        .parse()
        .map_err(|_| format!("Invalid IP address '{}'", ip))?;

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok((addr, p)),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}

/// Canonical CIDR form with host bits cleared ("10.0.0.1/16" -> "10.0.0.0/16")
///
/// Values that do not parse are returned unchanged.
pub fn canonical_cidr(cidr: &str) -> String {
    match parse_cidr(cidr.trim()) {
        Ok((addr, prefix)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            let network = Ipv4Addr::from(u32::from(addr) & mask);
            format!("{}/{}", network, prefix)
        }
        Err(_) => cidr.to_string(),
    }
}
