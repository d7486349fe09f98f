//! Resource kinds of the FlexibleEngine provider
//!
//! One handler per kind. Handlers hold the [`Services`] they talk to and only
//! deal with the vendor: validation, defaults, quota booking, read-back and
//! not-found handling happen in `nimbus_core::kind`.

pub mod blockstorage;
pub mod ces;
pub mod compute;
pub mod er;
pub mod networking;
pub mod vpc;
pub mod waf;

use std::sync::Arc;

use nimbus_core::identifier::{IdShape, Identifier};
use nimbus_core::kind::ResourceHandler;
use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::resource::State;

use crate::services::{Services, found};

/// Every resource kind, ready for registration
pub fn all(services: &Services) -> Vec<Arc<dyn ResourceHandler>> {
    vec![
        Arc::new(compute::InstanceHandler::new(services.clone())),
        Arc::new(compute::KeypairHandler::new(services.clone())),
        Arc::new(compute::VolumeAttachHandler::new(services.clone())),
        Arc::new(compute::FloatingIpAssociateHandler::new(services.clone())),
        Arc::new(blockstorage::VolumeHandler::new(services.clone())),
        Arc::new(networking::FloatingIpHandler::new(services.clone())),
        Arc::new(vpc::VpcHandler::new(services.clone())),
        Arc::new(vpc::SubnetHandler::new(services.clone())),
        Arc::new(waf::PolicyHandler::new(services.clone())),
        Arc::new(waf::PreciseRuleHandler::new(services.clone())),
        Arc::new(ces::AlarmRuleHandler::new(services.clone())),
        Arc::new(er::InstanceHandler::new(services.clone())),
        Arc::new(er::VpcAttachmentHandler::new(services.clone())),
        Arc::new(er::RouteTableHandler::new(services.clone())),
        Arc::new(er::StaticRouteHandler::new(services.clone())),
    ]
}

/// Cloud identifier of a prior state
pub(crate) fn identifier(prior: &State) -> ProviderResult<&str> {
    prior
        .identifier
        .as_deref()
        .ok_or_else(|| ProviderError::not_found("resource has no identifier"))
}

/// Prior identifier parsed with the given shape
pub(crate) fn parse_identifier(prior: &State, shape: IdShape) -> ProviderResult<Identifier> {
    let raw = identifier(prior)?;
    Identifier::parse(raw, shape)
        .map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))
}

/// `(parent, child)` of a nested identifier
pub(crate) fn nested_parts(prior: &State) -> ProviderResult<(String, String)> {
    let id = parse_identifier(prior, IdShape::Nested)?;
    let parent = id.parent().unwrap_or_default().to_string();
    Ok((parent, id.child().to_string()))
}

/// Waiter observation from a vendor lookup: not found becomes `None`
pub(crate) fn observed<T>(
    result: ProviderResult<T>,
    status: impl Fn(&T) -> String,
) -> ProviderResult<Option<(T, String)>> {
    Ok(found(result)?.map(|object| {
        let status = status(&object);
        (object, status)
    }))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use nimbus_core::kind::{ResourceHandler, ResourceKind};
    use nimbus_core::resource::{Resource, Value};
    use tokio_util::sync::CancellationToken;

    use crate::fake::FakeCloud;
    use crate::services::Services;

    pub fn cloud() -> (Arc<FakeCloud>, Services) {
        let cloud = Arc::new(FakeCloud::new());
        let services = Services::simulated(cloud.clone());
        (cloud, services)
    }

    pub fn kind(handler: impl ResourceHandler + 'static) -> ResourceKind {
        ResourceKind::new(Arc::new(handler)).unwrap()
    }

    pub fn resource(resource_type: &str, attributes: Vec<(&str, Value)>) -> Resource {
        attributes
            .into_iter()
            .fold(Resource::new(resource_type, "test"), |r, (k, v)| r.with_attribute(k, v))
    }

    pub fn block(attributes: Vec<(&str, Value)>) -> Value {
        Value::Map(
            attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn strings(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::string(*s)).collect())
    }

    pub fn token() -> CancellationToken {
        CancellationToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::registry::ProviderRegistry;
    use nimbus_core::resource::ResourceId;

    use crate::fake::FakeCloud;

    #[test]
    fn every_kind_registers() {
        let services = Services::simulated(Arc::new(FakeCloud::new()));
        let mut registry = ProviderRegistry::new("flexibleengine");
        for handler in all(&services) {
            registry.register_resource(handler).unwrap();
        }
        assert_eq!(
            nimbus_core::provider::Provider::resource_types(&registry).len(),
            15
        );
    }

    #[test]
    fn nested_identifier_parts() {
        let state = State::existing(ResourceId::new("t", "n"), Default::default())
            .with_identifier("policy-1/rule-2");
        assert_eq!(
            nested_parts(&state).unwrap(),
            ("policy-1".to_string(), "rule-2".to_string())
        );

        let flat = State::existing(ResourceId::new("t", "n"), Default::default())
            .with_identifier("rule-2");
        assert!(nested_parts(&flat).is_err());
    }
}
