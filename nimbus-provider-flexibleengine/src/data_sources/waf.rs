use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::kind::{DataShape, DataSourceHandler};
use nimbus_core::provider::ProviderResult;
use nimbus_core::resource::{Resource, Value};
use nimbus_core::schema::{AttributeSchema, AttributeType, BlockSchema, ResourceSchema, types};

use crate::binder::Args;
use crate::resources::waf::policy_state;
use crate::services::Services;

/// data flexibleengine_waf_dedicated_policies
pub struct PolicyListing {
    services: Services,
}

impl PolicyListing {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl DataSourceHandler for PolicyListing {
    fn schema(&self) -> ResourceSchema {
        let policy = BlockSchema::new()
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("level", AttributeType::Int).computed())
            .attribute(AttributeSchema::new("protection_mode", AttributeType::String).computed())
            .attribute(AttributeSchema::new("full_detection", AttributeType::Bool).computed());

        ResourceSchema::new("flexibleengine_waf_dedicated_policies")
            .with_description("Lists dedicated WAF policies")
            .attribute(AttributeSchema::new("name", AttributeType::String).optional())
            .attribute(AttributeSchema::new("policies", AttributeType::block(policy)).computed())
            .attribute(AttributeSchema::new("ids", types::string_list()).computed())
    }

    fn shape(&self) -> DataShape {
        DataShape::List("policies")
    }

    async fn query(
        &self,
        ctx: &OpContext,
        filter: &Resource,
    ) -> ProviderResult<Vec<HashMap<String, Value>>> {
        let name = Args::of(filter).get_string("name");
        let policies = ctx
            .run(self.services.waf.list_policies(name.as_deref()))
            .await?;
        Ok(policies
            .iter()
            .filter(|p| name.as_ref().is_none_or(|n| p.name == *n))
            .map(|p| policy_state(p).string("id", &p.id).finish())
            .collect())
    }
}
