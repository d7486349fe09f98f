//! Assertions run after each applied step
//!
//! Attribute checks compare flattened values (`tags.%`, `network.0.uuid`), the
//! same keys a state file shows.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nimbus_core::provider::Provider;
use nimbus_core::resource::State;
use regex::Regex;

/// Predicate over the object as the vendor reports it right now
pub type Predicate = Arc<dyn Fn(&State) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Check {
    /// Attribute equals a literal
    Equals {
        address: String,
        path: String,
        expected: String,
    },
    /// Attribute matches a regular expression
    Matches {
        address: String,
        path: String,
        pattern: String,
    },
    /// Attribute has a value
    Set { address: String, path: String },
    /// Attribute has no value
    Absent { address: String, path: String },
    /// Attribute equals an attribute of another resource
    Pair {
        address: String,
        path: String,
        other: String,
        other_path: String,
    },
    /// The vendor still reports the object, optionally satisfying a predicate
    Exists {
        address: String,
        predicate: Option<Predicate>,
    },
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Equals {
                address,
                path,
                expected,
            } => write!(f, "{}.{} == {:?}", address, path, expected),
            Check::Matches {
                address,
                path,
                pattern,
            } => write!(f, "{}.{} =~ /{}/", address, path, pattern),
            Check::Set { address, path } => write!(f, "{}.{} is set", address, path),
            Check::Absent { address, path } => write!(f, "{}.{} is absent", address, path),
            Check::Pair {
                address,
                path,
                other,
                other_path,
            } => write!(f, "{}.{} == {}.{}", address, path, other, other_path),
            Check::Exists { address, .. } => write!(f, "{} exists", address),
        }
    }
}

impl Check {
    pub fn equals(address: &str, path: &str, expected: impl ToString) -> Self {
        Check::Equals {
            address: address.to_string(),
            path: path.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn matches(address: &str, path: &str, pattern: &str) -> Self {
        Check::Matches {
            address: address.to_string(),
            path: path.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn set(address: &str, path: &str) -> Self {
        Check::Set {
            address: address.to_string(),
            path: path.to_string(),
        }
    }

    pub fn absent(address: &str, path: &str) -> Self {
        Check::Absent {
            address: address.to_string(),
            path: path.to_string(),
        }
    }

    pub fn pair(address: &str, path: &str, other: &str, other_path: &str) -> Self {
        Check::Pair {
            address: address.to_string(),
            path: path.to_string(),
            other: other.to_string(),
            other_path: other_path.to_string(),
        }
    }

    pub fn exists(address: &str) -> Self {
        Check::Exists {
            address: address.to_string(),
            predicate: None,
        }
    }

    pub fn exists_where(
        address: &str,
        predicate: impl Fn(&State) -> bool + Send + Sync + 'static,
    ) -> Self {
        Check::Exists {
            address: address.to_string(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// Evaluate against the applied states, keyed by document address
    pub async fn verify<P: Provider + ?Sized>(
        &self,
        provider: &P,
        known: &HashMap<String, State>,
    ) -> Result<(), String> {
        match self {
            Check::Equals {
                address,
                path,
                expected,
            } => match attribute(known, address, path)? {
                Some(actual) if actual == *expected => Ok(()),
                Some(actual) => Err(format!("{:?}: got {:?}", self, actual)),
                None => Err(format!("{:?}: not set", self)),
            },
            Check::Matches {
                address,
                path,
                pattern,
            } => {
                let re = Regex::new(pattern).map_err(|e| format!("{:?}: {}", self, e))?;
                match attribute(known, address, path)? {
                    Some(actual) if re.is_match(&actual) => Ok(()),
                    Some(actual) => Err(format!("{:?}: got {:?}", self, actual)),
                    None => Err(format!("{:?}: not set", self)),
                }
            }
            Check::Set { address, path } => match attribute(known, address, path)? {
                Some(actual) if !actual.is_empty() => Ok(()),
                _ => Err(format!("{:?}: not set", self)),
            },
            Check::Absent { address, path } => match attribute(known, address, path)? {
                None => Ok(()),
                Some(actual) => Err(format!("{:?}: got {:?}", self, actual)),
            },
            Check::Pair {
                address,
                path,
                other,
                other_path,
            } => {
                let left = attribute(known, address, path)?;
                let right = attribute(known, other, other_path)?;
                match (left, right) {
                    (Some(left), Some(right)) if left == right => Ok(()),
                    (left, right) => Err(format!("{:?}: {:?} != {:?}", self, left, right)),
                }
            }
            Check::Exists { address, predicate } => {
                let prior = state(known, address)?;
                let current = provider
                    .read(prior)
                    .await
                    .map_err(|e| format!("{:?}: {}", self, e))?;
                if !current.exists {
                    return Err(format!("{:?}: the vendor no longer reports it", self));
                }
                match predicate {
                    Some(predicate) if !predicate(&current) => {
                        Err(format!("{:?}: vendor object does not match", self))
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

fn state<'a>(known: &'a HashMap<String, State>, address: &str) -> Result<&'a State, String> {
    known
        .get(address)
        .ok_or_else(|| format!("{} is not in state", address))
}

fn attribute(
    known: &HashMap<String, State>,
    address: &str,
    path: &str,
) -> Result<Option<String>, String> {
    Ok(state(known, address)?.flatten().remove(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::resource::{ResourceId, Value};
    use nimbus_provider_flexibleengine::FakeCloud;

    fn known() -> HashMap<String, State> {
        let vpc = State::existing(
            ResourceId::new("flexibleengine_vpc_v1", "main"),
            HashMap::from([
                ("name".to_string(), Value::string("vpc-1")),
                ("cidr".to_string(), Value::string("192.168.0.0/16")),
            ]),
        )
        .with_identifier("vpc-id");
        let subnet = State::existing(
            ResourceId::new("flexibleengine_vpc_subnet_v1", "sub"),
            HashMap::from([("vpc_id".to_string(), Value::string("vpc-id"))]),
        );
        HashMap::from([
            ("flexibleengine_vpc_v1.main".to_string(), vpc),
            ("flexibleengine_vpc_subnet_v1.sub".to_string(), subnet),
        ])
    }

    #[tokio::test]
    async fn attribute_checks() {
        let provider =
            nimbus_provider_flexibleengine::simulated(Arc::new(FakeCloud::new())).unwrap();
        let known = known();
        let vpc = "flexibleengine_vpc_v1.main";

        let passing = [
            Check::equals(vpc, "name", "vpc-1"),
            Check::matches(vpc, "cidr", r"^192\.168\."),
            Check::set(vpc, "id"),
            Check::absent(vpc, "description"),
            Check::pair("flexibleengine_vpc_subnet_v1.sub", "vpc_id", vpc, "id"),
        ];
        for check in &passing {
            check.verify(&provider, &known).await.unwrap();
        }

        let failing = [
            Check::equals(vpc, "name", "vpc-2"),
            Check::matches(vpc, "cidr", r"^10\."),
            Check::set(vpc, "description"),
            Check::absent(vpc, "name"),
            Check::equals("flexibleengine_vpc_v1.other", "name", "vpc-1"),
        ];
        for check in &failing {
            assert!(check.verify(&provider, &known).await.is_err(), "{:?}", check);
        }
    }

    #[tokio::test]
    async fn exists_asks_the_vendor() {
        let provider =
            nimbus_provider_flexibleengine::simulated(Arc::new(FakeCloud::new())).unwrap();
        let err = Check::exists("flexibleengine_vpc_v1.main")
            .verify(&provider, &known())
            .await
            .unwrap_err();
        assert!(err.contains("no longer"), "{}", err);
    }
}
