//! ECS (Nova compatible) compute service: servers, flavors, key pairs and
//! volume attachments

use std::collections::BTreeMap;

use async_trait::async_trait;
use nimbus_core::provider::ProviderResult;
use nimbus_core::quota::QuotaUsage;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

use super::CloudClient;
use crate::client::field;

const ECS: &str = "ecs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Subnet network id
    pub uuid: String,
    pub fixed_ip_v4: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerCreate {
    pub name: String,
    pub image_id: Option<String>,
    pub flavor_id: String,
    pub key_pair: Option<String>,
    pub security_groups: Vec<String>,
    pub networks: Vec<NetworkAttachment>,
    pub availability_zone: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub user_data: Option<String>,
    pub admin_pass: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerNetwork {
    pub uuid: String,
    pub fixed_ip_v4: String,
    pub mac: String,
    pub port: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: String,
    pub flavor_id: String,
    pub image_id: String,
    pub key_pair: String,
    pub availability_zone: String,
    pub security_groups: Vec<String>,
    pub networks: Vec<ServerNetwork>,
    /// Floating addresses bound to the server
    pub floating_ips: Vec<String>,
    /// Every metadata item, including the ones the vendor sets itself
    pub metadata: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub created: String,
}

/// Metadata items ECS manages on its own
const VENDOR_METADATA: &[&str] = &["os_type", "os_bit", "image_name", "vpc_id", "charging_mode"];

pub fn is_vendor_metadata(key: &str) -> bool {
    key.starts_with("metering.") || VENDOR_METADATA.contains(&key)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFilter {
    pub name: Option<String>,
    pub status: Option<String>,
    pub flavor_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    pub vcpus: u64,
    /// Memory in MB
    pub ram: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeLimits {
    pub cores: QuotaUsage,
    pub ram_mb: QuotaUsage,
    pub instances: QuotaUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Keypair {
    pub name: String,
    pub public_key: String,
    pub fingerprint: String,
    /// Only returned when the vendor generated the key
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VolumeAttachment {
    pub id: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(rename = "volumeId")]
    pub volume_id: String,
    #[serde(default)]
    pub device: String,
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Returns the id of the new server
    async fn create_server(&self, spec: &ServerCreate) -> ProviderResult<String>;
    async fn get_server(&self, id: &str) -> ProviderResult<Server>;
    async fn list_servers(&self, filter: &ServerFilter) -> ProviderResult<Vec<Server>>;
    async fn rename_server(&self, id: &str, name: &str) -> ProviderResult<()>;
    async fn set_metadata(&self, id: &str, set: &BTreeMap<String, String>) -> ProviderResult<()>;
    async fn delete_metadata(&self, id: &str, key: &str) -> ProviderResult<()>;
    async fn add_server_tags(
        &self,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()>;
    async fn remove_server_tags(&self, id: &str, keys: &[String]) -> ProviderResult<()>;
    async fn add_security_group(&self, id: &str, group: &str) -> ProviderResult<()>;
    async fn remove_security_group(&self, id: &str, group: &str) -> ProviderResult<()>;
    async fn resize_server(&self, id: &str, flavor_id: &str) -> ProviderResult<()>;
    async fn confirm_resize(&self, id: &str) -> ProviderResult<()>;
    async fn delete_server(&self, id: &str) -> ProviderResult<()>;

    async fn get_flavor(&self, id: &str) -> ProviderResult<Flavor>;
    async fn limits(&self) -> ProviderResult<ComputeLimits>;

    async fn create_keypair(&self, name: &str, public_key: Option<&str>) -> ProviderResult<Keypair>;
    async fn get_keypair(&self, name: &str) -> ProviderResult<Keypair>;
    async fn delete_keypair(&self, name: &str) -> ProviderResult<()>;

    async fn attach_volume(
        &self,
        server_id: &str,
        volume_id: &str,
        device: Option<&str>,
    ) -> ProviderResult<VolumeAttachment>;
    async fn get_volume_attachment(
        &self,
        server_id: &str,
        attachment_id: &str,
    ) -> ProviderResult<VolumeAttachment>;
    async fn detach_volume(&self, server_id: &str, attachment_id: &str) -> ProviderResult<()>;
}

#[derive(Debug, Deserialize)]
struct NovaAddress {
    addr: String,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    kind: String,
    #[serde(rename = "OS-EXT-IPS-MAC:mac_addr", default)]
    mac: String,
}

#[derive(Debug, Deserialize)]
struct NovaRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NovaNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NovaServer {
    id: String,
    name: String,
    status: String,
    flavor: NovaRef,
    #[serde(default)]
    image: Json,
    #[serde(default)]
    key_name: Option<String>,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    availability_zone: String,
    #[serde(default)]
    security_groups: Vec<NovaNamed>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<NovaAddress>>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    created: String,
}

#[derive(Debug, Deserialize)]
struct ResourceTag {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct NovaInterface {
    port_id: String,
    net_id: String,
    mac_addr: String,
    fixed_ips: Vec<NovaFixedIp>,
}

#[derive(Debug, Deserialize)]
struct NovaFixedIp {
    ip_address: String,
}

impl NovaServer {
    fn into_server(self, interfaces: Vec<NovaInterface>, tags: Vec<ResourceTag>) -> Server {
        let mut floating_ips = Vec::new();
        let mut macs = BTreeMap::new();
        for address in self.addresses.values().flatten() {
            if address.kind == "floating" {
                floating_ips.push(address.addr.clone());
            } else {
                macs.insert(address.addr.clone(), address.mac.clone());
            }
        }
        let networks = interfaces
            .into_iter()
            .map(|iface| {
                let fixed_ip_v4 = iface
                    .fixed_ips
                    .first()
                    .map(|ip| ip.ip_address.clone())
                    .unwrap_or_default();
                ServerNetwork {
                    uuid: iface.net_id,
                    mac: macs.get(&fixed_ip_v4).cloned().unwrap_or(iface.mac_addr),
                    fixed_ip_v4,
                    port: iface.port_id,
                }
            })
            .collect();
        let mut security_groups: Vec<String> =
            self.security_groups.into_iter().map(|g| g.name).collect();
        security_groups.sort();
        security_groups.dedup();

        Server {
            id: self.id,
            name: self.name,
            status: self.status,
            flavor_id: self.flavor.id,
            image_id: self.image["id"].as_str().unwrap_or_default().to_string(),
            key_pair: self.key_name.unwrap_or_default(),
            availability_zone: self.availability_zone,
            security_groups,
            networks,
            floating_ips,
            metadata: self.metadata,
            tags: tags.into_iter().map(|t| (t.key, t.value)).collect(),
            created: self.created,
        }
    }
}

impl CloudClient {
    async fn server_action(&self, id: &str, action: Json) -> ProviderResult<()> {
        self.rest()
            .post(ECS, &format!("/v2.1/{{project_id}}/servers/{}/action", id), action)
            .await
            .map(|_| ())
    }

    async fn load_server(&self, raw: NovaServer) -> ProviderResult<Server> {
        let body = self
            .rest()
            .get(ECS, &format!("/v2.1/{{project_id}}/servers/{}/os-interface", raw.id))
            .await?;
        let interfaces: Vec<NovaInterface> = field(body, "interfaceAttachments")?;
        let body = self
            .rest()
            .get(ECS, &format!("/v1/{{project_id}}/cloudservers/{}/tags", raw.id))
            .await?;
        let tags: Vec<ResourceTag> = field(body, "tags")?;
        Ok(raw.into_server(interfaces, tags))
    }

    async fn server_tag_action(
        &self,
        id: &str,
        action: &str,
        tags: Vec<Json>,
    ) -> ProviderResult<()> {
        self.rest()
            .post(
                ECS,
                &format!("/v1/{{project_id}}/cloudservers/{}/tags/action", id),
                json!({ "action": action, "tags": tags }),
            )
            .await
            .map(|_| ())
    }
}

fn limit(value: &Json) -> Option<u64> {
    // -1 means unlimited
    value.as_i64().and_then(|v| u64::try_from(v).ok())
}

#[async_trait]
impl ComputeApi for CloudClient {
    async fn create_server(&self, spec: &ServerCreate) -> ProviderResult<String> {
        let networks: Vec<Json> = spec
            .networks
            .iter()
            .map(|n| match &n.fixed_ip_v4 {
                Some(ip) => json!({ "uuid": n.uuid, "fixed_ip": ip }),
                None => json!({ "uuid": n.uuid }),
            })
            .collect();
        let mut server = json!({
            "name": spec.name,
            "flavorRef": spec.flavor_id,
            "networks": networks,
            "security_groups": spec
                .security_groups
                .iter()
                .map(|g| json!({ "name": g }))
                .collect::<Vec<_>>(),
            "metadata": spec.metadata,
        });
        if let Some(image) = &spec.image_id {
            server["imageRef"] = json!(image);
        }
        if let Some(key) = &spec.key_pair {
            server["key_name"] = json!(key);
        }
        if let Some(az) = &spec.availability_zone {
            server["availability_zone"] = json!(az);
        }
        if let Some(user_data) = &spec.user_data {
            server["user_data"] = json!(user_data);
        }
        if let Some(pass) = &spec.admin_pass {
            server["adminPass"] = json!(pass);
        }
        let body = self
            .rest()
            .post(ECS, "/v2.1/{project_id}/servers", json!({ "server": server }))
            .await?;
        let created: NovaRef = field(body, "server")?;
        // Nova takes no key/value tags, they go through the ECS tag API
        if !spec.tags.is_empty() {
            self.add_server_tags(&created.id, &spec.tags).await?;
        }
        Ok(created.id)
    }

    async fn get_server(&self, id: &str) -> ProviderResult<Server> {
        let body = self
            .rest()
            .get(ECS, &format!("/v2.1/{{project_id}}/servers/{}", id))
            .await?;
        let raw: NovaServer = field(body, "server")?;
        self.load_server(raw).await
    }

    async fn list_servers(&self, filter: &ServerFilter) -> ProviderResult<Vec<Server>> {
        let mut query = Vec::new();
        if let Some(name) = &filter.name {
            query.push(format!("name={}", name));
        }
        if let Some(status) = &filter.status {
            query.push(format!("status={}", status));
        }
        if let Some(flavor) = &filter.flavor_id {
            query.push(format!("flavor={}", flavor));
        }
        let body = self
            .rest()
            .get(ECS, &format!("/v2.1/{{project_id}}/servers/detail?{}", query.join("&")))
            .await?;
        let raws: Vec<NovaServer> = field(body, "servers")?;
        let mut servers = Vec::with_capacity(raws.len());
        for raw in raws {
            servers.push(self.load_server(raw).await?);
        }
        Ok(servers)
    }

    async fn rename_server(&self, id: &str, name: &str) -> ProviderResult<()> {
        self.rest()
            .put(
                ECS,
                &format!("/v2.1/{{project_id}}/servers/{}", id),
                json!({ "server": { "name": name } }),
            )
            .await
            .map(|_| ())
    }

    async fn set_metadata(&self, id: &str, set: &BTreeMap<String, String>) -> ProviderResult<()> {
        self.rest()
            .post(
                ECS,
                &format!("/v2.1/{{project_id}}/servers/{}/metadata", id),
                json!({ "metadata": set }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_metadata(&self, id: &str, key: &str) -> ProviderResult<()> {
        self.rest()
            .delete(ECS, &format!("/v2.1/{{project_id}}/servers/{}/metadata/{}", id, key))
            .await
    }

    async fn add_server_tags(
        &self,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let tags = tags
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        self.server_tag_action(id, "create", tags).await
    }

    async fn remove_server_tags(&self, id: &str, keys: &[String]) -> ProviderResult<()> {
        let tags = keys.iter().map(|k| json!({ "key": k })).collect();
        self.server_tag_action(id, "delete", tags).await
    }

    async fn add_security_group(&self, id: &str, group: &str) -> ProviderResult<()> {
        self.server_action(id, json!({ "addSecurityGroup": { "name": group } }))
            .await
    }

    async fn remove_security_group(&self, id: &str, group: &str) -> ProviderResult<()> {
        self.server_action(id, json!({ "removeSecurityGroup": { "name": group } }))
            .await
    }

    async fn resize_server(&self, id: &str, flavor_id: &str) -> ProviderResult<()> {
        self.server_action(id, json!({ "resize": { "flavorRef": flavor_id } }))
            .await
    }

    async fn confirm_resize(&self, id: &str) -> ProviderResult<()> {
        self.server_action(id, json!({ "confirmResize": null })).await
    }

    async fn delete_server(&self, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(ECS, &format!("/v2.1/{{project_id}}/servers/{}", id))
            .await
    }

    async fn get_flavor(&self, id: &str) -> ProviderResult<Flavor> {
        let body = self
            .rest()
            .get(ECS, &format!("/v2.1/{{project_id}}/flavors/{}", id))
            .await?;
        field(body, "flavor")
    }

    async fn limits(&self) -> ProviderResult<ComputeLimits> {
        let body = self.rest().get(ECS, "/v2.1/{project_id}/limits").await?;
        let absolute = &body["limits"]["absolute"];
        let used = |key: &str| absolute[key].as_u64().unwrap_or(0);
        Ok(ComputeLimits {
            cores: QuotaUsage::new(used("totalCoresUsed"), limit(&absolute["maxTotalCores"])),
            ram_mb: QuotaUsage::new(used("totalRAMUsed"), limit(&absolute["maxTotalRAMSize"])),
            instances: QuotaUsage::new(
                used("totalInstancesUsed"),
                limit(&absolute["maxTotalInstances"]),
            ),
        })
    }

    async fn create_keypair(
        &self,
        name: &str,
        public_key: Option<&str>,
    ) -> ProviderResult<Keypair> {
        let mut keypair = json!({ "name": name });
        if let Some(key) = public_key {
            keypair["public_key"] = json!(key);
        }
        let body = self
            .rest()
            .post(ECS, "/v2.1/{project_id}/os-keypairs", json!({ "keypair": keypair }))
            .await?;
        field(body, "keypair")
    }

    async fn get_keypair(&self, name: &str) -> ProviderResult<Keypair> {
        let body = self
            .rest()
            .get(ECS, &format!("/v2.1/{{project_id}}/os-keypairs/{}", name))
            .await?;
        field(body, "keypair")
    }

    async fn delete_keypair(&self, name: &str) -> ProviderResult<()> {
        self.rest()
            .delete(ECS, &format!("/v2.1/{{project_id}}/os-keypairs/{}", name))
            .await
    }

    async fn attach_volume(
        &self,
        server_id: &str,
        volume_id: &str,
        device: Option<&str>,
    ) -> ProviderResult<VolumeAttachment> {
        let mut attachment = json!({ "volumeId": volume_id });
        if let Some(device) = device {
            attachment["device"] = json!(device);
        }
        let body = self
            .rest()
            .post(
                ECS,
                &format!("/v2.1/{{project_id}}/servers/{}/os-volume_attachments", server_id),
                json!({ "volumeAttachment": attachment }),
            )
            .await?;
        field(body, "volumeAttachment")
    }

    async fn get_volume_attachment(
        &self,
        server_id: &str,
        attachment_id: &str,
    ) -> ProviderResult<VolumeAttachment> {
        let body = self
            .rest()
            .get(
                ECS,
                &format!(
                    "/v2.1/{{project_id}}/servers/{}/os-volume_attachments/{}",
                    server_id, attachment_id
                ),
            )
            .await?;
        field(body, "volumeAttachment")
    }

    async fn detach_volume(&self, server_id: &str, attachment_id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(
                ECS,
                &format!(
                    "/v2.1/{{project_id}}/servers/{}/os-volume_attachments/{}",
                    server_id, attachment_id
                ),
            )
            .await
    }
}
