//! Enterprise Router: instances, VPC attachments, route tables and static routes

use async_trait::async_trait;
use nimbus_core::provider::ProviderResult;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::CloudClient;
use crate::client::{encode, field};

const ER: &str = "er";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstanceSpec {
    pub name: String,
    pub asn: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub availability_zone_ids: Vec<String>,
    pub enable_default_propagation: bool,
    pub enable_default_association: bool,
    pub auto_accept_shared_attachments: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub asn: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub availability_zone_ids: Vec<String>,
    #[serde(default)]
    pub enable_default_propagation: bool,
    #[serde(default)]
    pub enable_default_association: bool,
    #[serde(default)]
    pub auto_accept_shared_attachments: bool,
    #[serde(default)]
    pub default_propagation_route_table_id: String,
    #[serde(default)]
    pub default_association_route_table_id: String,
    pub state: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttachmentSpec {
    pub name: String,
    pub vpc_id: String,
    pub virsubnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub auto_create_vpc_routes: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    pub virsubnet_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_create_vpc_routes: bool,
    pub state: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteTableSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default_association: bool,
    #[serde(default)]
    pub is_default_propagation: bool,
    pub state: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StaticRouteSpec {
    pub destination: String,
    /// Next hop; absent for blackhole routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    pub is_blackhole: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StaticRoute {
    pub id: String,
    pub route_table_id: String,
    pub destination: String,
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub is_blackhole: bool,
    #[serde(rename = "type", default)]
    pub route_type: String,
    pub state: String,
    #[serde(default)]
    pub created_at: String,
}

#[async_trait]
pub trait ErApi: Send + Sync {
    async fn create_instance(&self, spec: &InstanceSpec) -> ProviderResult<String>;
    async fn get_instance(&self, id: &str) -> ProviderResult<Instance>;
    async fn update_instance(&self, id: &str, spec: &InstanceSpec) -> ProviderResult<()>;
    async fn delete_instance(&self, id: &str) -> ProviderResult<()>;

    async fn create_vpc_attachment(
        &self,
        instance_id: &str,
        spec: &AttachmentSpec,
    ) -> ProviderResult<String>;
    async fn get_vpc_attachment(&self, instance_id: &str, id: &str) -> ProviderResult<Attachment>;
    async fn update_vpc_attachment(
        &self,
        instance_id: &str,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> ProviderResult<()>;
    async fn delete_vpc_attachment(&self, instance_id: &str, id: &str) -> ProviderResult<()>;

    async fn create_route_table(
        &self,
        instance_id: &str,
        spec: &RouteTableSpec,
    ) -> ProviderResult<String>;
    async fn get_route_table(&self, instance_id: &str, id: &str) -> ProviderResult<RouteTable>;
    async fn update_route_table(
        &self,
        instance_id: &str,
        id: &str,
        spec: &RouteTableSpec,
    ) -> ProviderResult<()>;
    async fn delete_route_table(&self, instance_id: &str, id: &str) -> ProviderResult<()>;

    async fn create_static_route(
        &self,
        route_table_id: &str,
        spec: &StaticRouteSpec,
    ) -> ProviderResult<String>;
    async fn get_static_route(&self, route_table_id: &str, id: &str) -> ProviderResult<StaticRoute>;
    async fn update_static_route(
        &self,
        route_table_id: &str,
        id: &str,
        spec: &StaticRouteSpec,
    ) -> ProviderResult<()>;
    async fn delete_static_route(&self, route_table_id: &str, id: &str) -> ProviderResult<()>;
}

fn instance_path(instance_id: &str) -> String {
    format!("/v3/{{project_id}}/enterprise-router/instances/{}", instance_id)
}

#[async_trait]
impl ErApi for CloudClient {
    async fn create_instance(&self, spec: &InstanceSpec) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(
                ER,
                "/v3/{project_id}/enterprise-router/instances",
                json!({ "instance": encode(spec)? }),
            )
            .await?;
        let created: Instance = field(body, "instance")?;
        Ok(created.id)
    }

    async fn get_instance(&self, id: &str) -> ProviderResult<Instance> {
        let body = self.rest().get(ER, &instance_path(id)).await?;
        field(body, "instance")
    }

    async fn update_instance(&self, id: &str, spec: &InstanceSpec) -> ProviderResult<()> {
        let update = json!({
            "name": spec.name,
            "description": spec.description.clone().unwrap_or_default(),
            "enable_default_propagation": spec.enable_default_propagation,
            "enable_default_association": spec.enable_default_association,
            "auto_accept_shared_attachments": spec.auto_accept_shared_attachments,
        });
        self.rest()
            .put(ER, &instance_path(id), json!({ "instance": update }))
            .await
            .map(|_| ())
    }

    async fn delete_instance(&self, id: &str) -> ProviderResult<()> {
        self.rest().delete(ER, &instance_path(id)).await
    }

    async fn create_vpc_attachment(
        &self,
        instance_id: &str,
        spec: &AttachmentSpec,
    ) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(
                ER,
                &format!("{}/vpc-attachments", instance_path(instance_id)),
                json!({ "vpc_attachment": encode(spec)? }),
            )
            .await?;
        let created: Attachment = field(body, "vpc_attachment")?;
        Ok(created.id)
    }

    async fn get_vpc_attachment(&self, instance_id: &str, id: &str) -> ProviderResult<Attachment> {
        let body = self
            .rest()
            .get(ER, &format!("{}/vpc-attachments/{}", instance_path(instance_id), id))
            .await?;
        field(body, "vpc_attachment")
    }

    async fn update_vpc_attachment(
        &self,
        instance_id: &str,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> ProviderResult<()> {
        self.rest()
            .put(
                ER,
                &format!("{}/vpc-attachments/{}", instance_path(instance_id), id),
                json!({
                    "vpc_attachment": {
                        "name": name,
                        "description": description.unwrap_or_default()
                    }
                }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_vpc_attachment(&self, instance_id: &str, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(ER, &format!("{}/vpc-attachments/{}", instance_path(instance_id), id))
            .await
    }

    async fn create_route_table(
        &self,
        instance_id: &str,
        spec: &RouteTableSpec,
    ) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(
                ER,
                &format!("{}/route-tables", instance_path(instance_id)),
                json!({ "route_table": encode(spec)? }),
            )
            .await?;
        let created: RouteTable = field(body, "route_table")?;
        Ok(created.id)
    }

    async fn get_route_table(&self, instance_id: &str, id: &str) -> ProviderResult<RouteTable> {
        let body = self
            .rest()
            .get(ER, &format!("{}/route-tables/{}", instance_path(instance_id), id))
            .await?;
        field(body, "route_table")
    }

    async fn update_route_table(
        &self,
        instance_id: &str,
        id: &str,
        spec: &RouteTableSpec,
    ) -> ProviderResult<()> {
        self.rest()
            .put(
                ER,
                &format!("{}/route-tables/{}", instance_path(instance_id), id),
                json!({ "route_table": encode(spec)? }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_route_table(&self, instance_id: &str, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(ER, &format!("{}/route-tables/{}", instance_path(instance_id), id))
            .await
    }

    async fn create_static_route(
        &self,
        route_table_id: &str,
        spec: &StaticRouteSpec,
    ) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(
                ER,
                &format!(
                    "/v3/{{project_id}}/enterprise-router/route-tables/{}/static-routes",
                    route_table_id
                ),
                json!({ "route": encode(spec)? }),
            )
            .await?;
        let created: StaticRoute = field(body, "route")?;
        Ok(created.id)
    }

    async fn get_static_route(
        &self,
        route_table_id: &str,
        id: &str,
    ) -> ProviderResult<StaticRoute> {
        let body = self
            .rest()
            .get(
                ER,
                &format!(
                    "/v3/{{project_id}}/enterprise-router/route-tables/{}/static-routes/{}",
                    route_table_id, id
                ),
            )
            .await?;
        field(body, "route")
    }

    async fn update_static_route(
        &self,
        route_table_id: &str,
        id: &str,
        spec: &StaticRouteSpec,
    ) -> ProviderResult<()> {
        self.rest()
            .put(
                ER,
                &format!(
                    "/v3/{{project_id}}/enterprise-router/route-tables/{}/static-routes/{}",
                    route_table_id, id
                ),
                json!({
                    "route": {
                        "attachment_id": spec.attachment_id,
                        "is_blackhole": spec.is_blackhole
                    }
                }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_static_route(&self, route_table_id: &str, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(
                ER,
                &format!(
                    "/v3/{{project_id}}/enterprise-router/route-tables/{}/static-routes/{}",
                    route_table_id, id
                ),
            )
            .await
    }
}
