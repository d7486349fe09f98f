use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::kind::{DataShape, DataSourceHandler, MultiMatch};
use nimbus_core::provider::ProviderResult;
use nimbus_core::resource::{Resource, Value};
use nimbus_core::schema::{AttributeSchema, AttributeType, BlockSchema, ResourceSchema, types};

use crate::binder::Args;
use crate::resources::compute::server_state;
use crate::services::Services;
use crate::services::compute::ServerFilter;

fn filter_attributes(schema: ResourceSchema) -> ResourceSchema {
    schema
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .optional()
                .computed(),
        )
        .attribute(
            AttributeSchema::new("status", AttributeType::String)
                .optional()
                .computed(),
        )
        .attribute(
            AttributeSchema::new("flavor_id", AttributeType::String)
                .optional()
                .computed(),
        )
}

fn server_block() -> BlockSchema {
    let network = BlockSchema::new()
        .attribute(AttributeSchema::new("uuid", AttributeType::String).computed())
        .attribute(AttributeSchema::new("fixed_ip_v4", AttributeType::String).computed())
        .attribute(AttributeSchema::new("mac", AttributeType::String).computed())
        .attribute(AttributeSchema::new("port", AttributeType::String).computed());
    [
        "id",
        "name",
        "status",
        "flavor_id",
        "image_id",
        "availability_zone",
        "key_pair",
        "access_ip_v4",
        "floating_ip",
    ]
    .into_iter()
    .fold(BlockSchema::new(), |block, name| {
        block.attribute(AttributeSchema::new(name, AttributeType::String).computed())
    })
    .attribute(AttributeSchema::new("security_groups", types::string_set()).computed())
    .attribute(AttributeSchema::new("network", AttributeType::block(network)).computed())
    .attribute(AttributeSchema::new("metadata", types::string_map()).computed())
    .attribute(AttributeSchema::new("all_metadata", types::string_map()).computed())
    .attribute(AttributeSchema::new("tags", types::string_map()).computed())
}

/// Servers matching the filter. The vendor matches names by substring, so
/// the name is compared exactly here.
async fn matching_servers(
    services: &Services,
    ctx: &OpContext,
    filter: &Resource,
) -> ProviderResult<Vec<HashMap<String, Value>>> {
    let args = Args::of(filter);
    let query = ServerFilter {
        name: args.get_string("name"),
        status: args.get_string("status"),
        flavor_id: args.get_string("flavor_id"),
    };
    let servers = ctx.run(services.compute.list_servers(&query)).await?;
    Ok(servers
        .iter()
        .filter(|s| query.name.as_ref().is_none_or(|n| s.name == *n))
        .map(|s| {
            let mut state = server_state(s);
            state.insert("id".to_string(), Value::string(&s.id));
            state
        })
        .collect())
}

// =============================================================================
// data flexibleengine_compute_instance_v2
// =============================================================================

pub struct InstanceLookup {
    services: Services,
}

impl InstanceLookup {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl DataSourceHandler for InstanceLookup {
    fn schema(&self) -> ResourceSchema {
        let mut schema = filter_attributes(
            ResourceSchema::new("flexibleengine_compute_instance_v2")
                .with_description("Looks up a single elastic cloud server"),
        );
        for (name, attribute) in server_block().attributes {
            if name != "id" && schema.get(&name).is_none() {
                schema = schema.attribute(attribute);
            }
        }
        schema
    }

    fn shape(&self) -> DataShape {
        DataShape::Single(MultiMatch::Error)
    }

    async fn query(
        &self,
        ctx: &OpContext,
        filter: &Resource,
    ) -> ProviderResult<Vec<HashMap<String, Value>>> {
        matching_servers(&self.services, ctx, filter).await
    }
}

// =============================================================================
// data flexibleengine_compute_instances
// =============================================================================

pub struct InstanceListing {
    services: Services,
}

impl InstanceListing {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl DataSourceHandler for InstanceListing {
    fn schema(&self) -> ResourceSchema {
        filter_attributes(
            ResourceSchema::new("flexibleengine_compute_instances")
                .with_description("Lists elastic cloud servers"),
        )
        .attribute(
            AttributeSchema::new("instances", AttributeType::block(server_block())).computed(),
        )
        .attribute(AttributeSchema::new("ids", types::string_list()).computed())
    }

    fn shape(&self) -> DataShape {
        DataShape::List("instances")
    }

    async fn query(
        &self,
        ctx: &OpContext,
        filter: &Resource,
    ) -> ProviderResult<Vec<HashMap<String, Value>>> {
        matching_servers(&self.services, ctx, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::compute::InstanceHandler;
    use crate::resources::testing::{block, cloud, kind, resource, token};
    use nimbus_core::kind::DataSourceKind;
    use nimbus_core::provider::ErrorKind;
    use std::sync::Arc;

    async fn launch(services: &Services, name: &str, flavor: &str) -> String {
        let desired = resource(
            "flexibleengine_compute_instance_v2",
            vec![
                ("name", Value::string(name)),
                ("flavor_id", Value::string(flavor)),
                ("network", Value::List(vec![block(vec![("uuid", Value::string("net-1"))])])),
            ],
        );
        kind(InstanceHandler::new(services.clone()))
            .create(&token(), None, &desired)
            .await
            .unwrap()
            .identifier
            .unwrap()
    }

    #[tokio::test]
    async fn lookup_matches_names_exactly() {
        let (_cloud, services) = cloud();
        let web = launch(&services, "web", "s3.small.1").await;
        launch(&services, "web-2", "s3.small.1").await;
        let lookup = DataSourceKind::new(Arc::new(InstanceLookup::new(services))).unwrap();

        let filter = resource(
            "flexibleengine_compute_instance_v2",
            vec![("name", Value::string("web"))],
        );
        let state = lookup.read(&token(), &filter).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some(web.as_str()));
        assert_eq!(state.get("flavor_id"), Some(Value::string("s3.small.1")));
        assert_eq!(state.get("status"), Some(Value::string("ACTIVE")));
    }

    #[tokio::test]
    async fn lookup_rejects_ambiguous_and_empty_results() {
        let (_cloud, services) = cloud();
        launch(&services, "a", "s3.small.1").await;
        launch(&services, "b", "s3.small.1").await;
        let lookup = DataSourceKind::new(Arc::new(InstanceLookup::new(services))).unwrap();

        let by_flavor = resource(
            "flexibleengine_compute_instance_v2",
            vec![("flavor_id", Value::string("s3.small.1"))],
        );
        let err = lookup.read(&token(), &by_flavor).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let missing = resource(
            "flexibleengine_compute_instance_v2",
            vec![("name", Value::string("nope"))],
        );
        let err = lookup.read(&token(), &missing).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn listing_collects_every_match() {
        let (_cloud, services) = cloud();
        let small = launch(&services, "a", "s3.small.1").await;
        launch(&services, "b", "s3.large.2").await;
        let listing = DataSourceKind::new(Arc::new(InstanceListing::new(services))).unwrap();

        let filter = resource(
            "flexibleengine_compute_instances",
            vec![("flavor_id", Value::string("s3.small.1"))],
        );
        let state = listing.read(&token(), &filter).await.unwrap();
        assert_eq!(state.get("ids"), Some(Value::List(vec![Value::string(small)])));
        assert_eq!(state.get("instances.0.name"), Some(Value::string("a")));

        let everything = resource("flexibleengine_compute_instances", vec![]);
        let state = listing.read(&token(), &everything).await.unwrap();
        assert_eq!(state.get("ids").and_then(|ids| ids.as_list().map(<[Value]>::len)), Some(2));
    }
}
