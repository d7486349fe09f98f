//! VPC v1: virtual private clouds, subnets and their tags

use std::collections::BTreeMap;

use async_trait::async_trait;
use nimbus_core::provider::ProviderResult;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

use super::CloudClient;
use crate::client::field;

const VPC: &str = "vpc";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VpcSpec {
    pub name: String,
    pub cidr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub vpc_id: String,
    #[serde(default)]
    pub dhcp_enable: bool,
    #[serde(default)]
    pub primary_dns: String,
    #[serde(default)]
    pub secondary_dns: String,
    #[serde(rename = "dnsList", default)]
    pub dns_list: Vec<String>,
    #[serde(default)]
    pub availability_zone: String,
    pub status: String,
    /// Neutron subnet id
    #[serde(default)]
    pub neutron_subnet_id: String,
    #[serde(skip)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubnetSpec {
    pub name: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub vpc_id: String,
    pub dhcp_enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_dns: Option<String>,
    #[serde(rename = "dnsList", skip_serializing_if = "Vec::is_empty")]
    pub dns_list: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// Objects carrying VPC tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTarget {
    Vpc,
    Subnet,
}

impl TagTarget {
    fn collection(self) -> &'static str {
        match self {
            TagTarget::Vpc => "vpcs",
            TagTarget::Subnet => "subnets",
        }
    }
}

#[async_trait]
pub trait VpcApi: Send + Sync {
    async fn create_vpc(&self, spec: &VpcSpec) -> ProviderResult<String>;
    async fn get_vpc(&self, id: &str) -> ProviderResult<Vpc>;
    async fn update_vpc(&self, id: &str, spec: &VpcSpec) -> ProviderResult<()>;
    async fn delete_vpc(&self, id: &str) -> ProviderResult<()>;

    async fn create_subnet(&self, spec: &SubnetSpec) -> ProviderResult<String>;
    async fn get_subnet(&self, id: &str) -> ProviderResult<Subnet>;
    async fn update_subnet(&self, id: &str, spec: &SubnetSpec) -> ProviderResult<()>;
    async fn delete_subnet(&self, vpc_id: &str, id: &str) -> ProviderResult<()>;

    async fn add_tags(
        &self,
        target: TagTarget,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()>;
    async fn remove_tags(&self, target: TagTarget, id: &str, keys: &[String]) -> ProviderResult<()>;
}

impl CloudClient {
    async fn tags(&self, target: TagTarget, id: &str) -> ProviderResult<BTreeMap<String, String>> {
        let body = self
            .rest()
            .get(
                VPC,
                &format!("/v2.0/{{project_id}}/{}/{}/tags", target.collection(), id),
            )
            .await?;
        let tags = body["tags"].as_array().cloned().unwrap_or_default();
        Ok(tags
            .iter()
            .filter_map(|t| {
                Some((t["key"].as_str()?.to_string(), t["value"].as_str()?.to_string()))
            })
            .collect())
    }

    async fn tag_action(
        &self,
        target: TagTarget,
        id: &str,
        action: &str,
        tags: Json,
    ) -> ProviderResult<()> {
        self.rest()
            .post(
                VPC,
                &format!("/v2.0/{{project_id}}/{}/{}/tags/action", target.collection(), id),
                json!({ "action": action, "tags": tags }),
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl VpcApi for CloudClient {
    async fn create_vpc(&self, spec: &VpcSpec) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(VPC, "/v1/{project_id}/vpcs", json!({ "vpc": spec }))
            .await?;
        let vpc: Vpc = field(body, "vpc")?;
        Ok(vpc.id)
    }

    async fn get_vpc(&self, id: &str) -> ProviderResult<Vpc> {
        let body = self
            .rest()
            .get(VPC, &format!("/v1/{{project_id}}/vpcs/{}", id))
            .await?;
        let mut vpc: Vpc = field(body, "vpc")?;
        vpc.tags = self.tags(TagTarget::Vpc, id).await?;
        Ok(vpc)
    }

    async fn update_vpc(&self, id: &str, spec: &VpcSpec) -> ProviderResult<()> {
        self.rest()
            .put(VPC, &format!("/v1/{{project_id}}/vpcs/{}", id), json!({ "vpc": spec }))
            .await
            .map(|_| ())
    }

    async fn delete_vpc(&self, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(VPC, &format!("/v1/{{project_id}}/vpcs/{}", id))
            .await
    }

    async fn create_subnet(&self, spec: &SubnetSpec) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(VPC, "/v1/{project_id}/subnets", json!({ "subnet": spec }))
            .await?;
        let subnet: Subnet = field(body, "subnet")?;
        Ok(subnet.id)
    }

    async fn get_subnet(&self, id: &str) -> ProviderResult<Subnet> {
        let body = self
            .rest()
            .get(VPC, &format!("/v1/{{project_id}}/subnets/{}", id))
            .await?;
        let mut subnet: Subnet = field(body, "subnet")?;
        subnet.tags = self.tags(TagTarget::Subnet, id).await?;
        Ok(subnet)
    }

    async fn update_subnet(&self, id: &str, spec: &SubnetSpec) -> ProviderResult<()> {
        let update = json!({
            "name": spec.name,
            "dhcp_enable": spec.dhcp_enable,
            "primary_dns": spec.primary_dns,
            "secondary_dns": spec.secondary_dns,
            "dnsList": spec.dns_list,
        });
        self.rest()
            .put(
                VPC,
                &format!("/v1/{{project_id}}/vpcs/{}/subnets/{}", spec.vpc_id, id),
                json!({ "subnet": update }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_subnet(&self, vpc_id: &str, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(VPC, &format!("/v1/{{project_id}}/vpcs/{}/subnets/{}", vpc_id, id))
            .await
    }

    async fn add_tags(
        &self,
        target: TagTarget,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let tags: Vec<Json> = tags
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        self.tag_action(target, id, "create", Json::Array(tags)).await
    }

    async fn remove_tags(
        &self,
        target: TagTarget,
        id: &str,
        keys: &[String],
    ) -> ProviderResult<()> {
        let tags: Vec<Json> = keys.iter().map(|k| json!({ "key": k })).collect();
        self.tag_action(target, id, "delete", Json::Array(tags)).await
    }
}
