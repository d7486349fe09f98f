//! Provider registry - the resource kinds and data sources of one cloud
//!
//! Registration happens once at provider init and checks every schema;
//! afterwards the registry is read-only and shared behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::TimeoutOverrides;
use crate::kind::{DataSourceHandler, DataSourceKind, ResourceHandler, ResourceKind};
use crate::provider::{BoxFuture, Provider, ProviderError, ProviderResult};
use crate::quota::QuotaBooker;
use crate::resource::{Resource, ResourceId, State};
use crate::schema::{ResourceSchema, SchemaDefinitionError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("'{name}' does not follow <vendor>_<domain>_<object>[_<version>] for vendor '{vendor}'")]
    InvalidName { name: String, vendor: String },

    #[error("'{0}' is registered twice")]
    Duplicate(String),

    #[error(transparent)]
    Schema(#[from] SchemaDefinitionError),
}

/// All kinds a provider manages
pub struct ProviderRegistry {
    vendor: String,
    resources: BTreeMap<String, ResourceKind>,
    data_sources: BTreeMap<String, DataSourceKind>,
    timeouts: BTreeMap<String, TimeoutOverrides>,
    booker: Option<Arc<QuotaBooker>>,
    cancel: CancellationToken,
}

impl ProviderRegistry {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            resources: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            timeouts: BTreeMap::new(),
            booker: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Per-kind timeout overrides; applied to kinds registered afterwards
    pub fn with_timeout_overrides(mut self, overrides: BTreeMap<String, TimeoutOverrides>) -> Self {
        self.timeouts = overrides;
        self
    }

    /// Book quota on this booker before every create
    pub fn with_quota_booker(mut self, booker: Arc<QuotaBooker>) -> Self {
        self.booker = Some(booker);
        self
    }

    pub fn quota_booker(&self) -> Option<&Arc<QuotaBooker>> {
        self.booker.as_ref()
    }

    /// Cancelling this token cancels every operation in flight
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn check_name(&self, name: &str) -> Result<(), RegistryError> {
        let pattern = format!(r"^{}(_[a-z0-9]+){{2,}}$", regex::escape(&self.vendor));
        let valid = Regex::new(&pattern)
            .map(|re| re.is_match(name))
            .unwrap_or(false);
        if valid {
            Ok(())
        } else {
            Err(RegistryError::InvalidName {
                name: name.to_string(),
                vendor: self.vendor.clone(),
            })
        }
    }

    pub fn register_resource(
        &mut self,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<&mut Self, RegistryError> {
        let mut kind = ResourceKind::new(handler)?;
        let name = kind.name().to_string();
        self.check_name(&name)?;
        if self.resources.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        if let Some(overrides) = self.timeouts.get(&name) {
            kind = kind.with_timeout_overrides(overrides);
        }
        self.resources.insert(name, kind);
        Ok(self)
    }

    pub fn register_data_source(
        &mut self,
        handler: Arc<dyn DataSourceHandler>,
    ) -> Result<&mut Self, RegistryError> {
        let kind = DataSourceKind::new(handler)?;
        let name = kind.name().to_string();
        self.check_name(&name)?;
        if self.data_sources.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.data_sources.insert(name, kind);
        Ok(self)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceKind> {
        self.resources.get(name)
    }

    pub fn data_source(&self, name: &str) -> Option<&DataSourceKind> {
        self.data_sources.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceKind> {
        self.resources.values()
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSourceKind> {
        self.data_sources.values()
    }

    fn kind_for(&self, id: &ResourceId) -> ProviderResult<&ResourceKind> {
        self.resources.get(&id.resource_type).ok_or_else(|| {
            ProviderError::unsupported(format!("unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })
    }
}

impl Provider for ProviderRegistry {
    fn name(&self) -> &str {
        &self.vendor
    }

    fn resource_types(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    fn schema(&self, resource_type: &str, data_source: bool) -> Option<&ResourceSchema> {
        if data_source {
            self.data_sources.get(resource_type).map(DataSourceKind::schema)
        } else {
            self.resources.get(resource_type).map(ResourceKind::schema)
        }
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        if resource.is_data_source() {
            match self.data_sources.get(&resource.id.resource_type) {
                Some(kind) => kind.validate(resource),
                None => Err(ProviderError::unsupported(format!(
                    "unknown data source: {}",
                    resource.id.resource_type
                ))
                .for_resource(resource.id.clone())),
            }
        } else {
            self.kind_for(&resource.id)?.validate(resource)
        }
    }

    fn read(&self, prior: &State) -> BoxFuture<'_, ProviderResult<State>> {
        let prior = prior.clone();
        Box::pin(async move { self.kind_for(&prior.id)?.read(&self.cancel, &prior).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            self.kind_for(&resource.id)?
                .create(&self.cancel, self.booker.as_deref(), &resource)
                .await
        })
    }

    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.kind_for(&to.id)?.update(&self.cancel, &from, &to).await })
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        let state = state.clone();
        Box::pin(async move { self.kind_for(&state.id)?.delete(&self.cancel, &state).await })
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let import_id = import_id.to_string();
        Box::pin(async move {
            self.kind_for(&id)?
                .import(&self.cancel, &id, &import_id)
                .await
        })
    }

    fn read_data_source(&self, query: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let query = query.clone();
        Box::pin(async move {
            let kind = self.data_sources.get(&query.id.resource_type).ok_or_else(|| {
                ProviderError::unsupported(format!(
                    "unknown data source: {}",
                    query.id.resource_type
                ))
                .for_resource(query.id.clone())
            })?;
            kind.read(&self.cancel, &query).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OpContext;
    use crate::kind::DataShape;
    use crate::resource::Value;
    use crate::schema::{AttributeSchema, AttributeType};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Named(&'static str, bool);

    #[async_trait]
    impl ResourceHandler for Named {
        fn schema(&self) -> ResourceSchema {
            let name = AttributeSchema::new("name", AttributeType::String);
            // second flag produces a schema with neither required nor optional
            let name = if self.1 { name.required() } else { name };
            ResourceSchema::new(self.0).attribute(name)
        }

        async fn create(&self, _ctx: &OpContext, _desired: &Resource) -> ProviderResult<String> {
            Ok("id".to_string())
        }

        async fn read(
            &self,
            _ctx: &OpContext,
            _prior: &State,
        ) -> ProviderResult<Option<HashMap<String, Value>>> {
            Ok(None)
        }

        async fn delete(&self, _ctx: &OpContext, _prior: &State) -> ProviderResult<()> {
            Ok(())
        }
    }

    struct Listing;

    #[async_trait]
    impl DataSourceHandler for Listing {
        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new("flexibleengine_compute_instances")
                .attribute(AttributeSchema::new("name", AttributeType::String).optional())
                .attribute(
                    AttributeSchema::new("ids", AttributeType::list(AttributeType::String))
                        .computed(),
                )
        }

        fn shape(&self) -> DataShape {
            DataShape::List("instances")
        }

        async fn query(
            &self,
            _ctx: &OpContext,
            _filter: &Resource,
        ) -> ProviderResult<Vec<HashMap<String, Value>>> {
            Ok(vec![
                HashMap::from([("id".to_string(), Value::string("b"))]),
                HashMap::from([("id".to_string(), Value::string("a"))]),
            ])
        }
    }

    #[test]
    fn registration_checks_names_schemas_and_duplicates() {
        let mut registry = ProviderRegistry::new("flexibleengine");
        registry
            .register_resource(Arc::new(Named("flexibleengine_vpc_v1", true)))
            .unwrap();

        assert!(matches!(
            registry.register_resource(Arc::new(Named("flexibleengine_vpc_v1", true))),
            Err(RegistryError::Duplicate(_))
        ));
        assert!(matches!(
            registry.register_resource(Arc::new(Named("aws_vpc_v1", true))),
            Err(RegistryError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.register_resource(Arc::new(Named("flexibleengine_vpc", true))),
            Err(RegistryError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.register_resource(Arc::new(Named("flexibleengine_er_instance", false))),
            Err(RegistryError::Schema(_))
        ));
        assert_eq!(registry.resource_types(), vec!["flexibleengine_vpc_v1"]);
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let registry = ProviderRegistry::new("flexibleengine");
        let err = registry
            .create(&Resource::new("flexibleengine_nope_v1", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::provider::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn list_data_source_collects_sorted_ids() {
        let mut registry = ProviderRegistry::new("flexibleengine");
        registry.register_data_source(Arc::new(Listing)).unwrap();
        let query = Resource::new("flexibleengine_compute_instances", "all").with_read_only(true);
        let state = registry.read_data_source(&query).await.unwrap();
        assert_eq!(
            state.get("ids"),
            Some(Value::List(vec![Value::string("a"), Value::string("b")]))
        );
        assert_eq!(state.identifier.as_deref(), Some("a,b"));

        let again = registry.read_data_source(&query).await.unwrap();
        assert_eq!(again.identifier, state.identifier);
    }
}
