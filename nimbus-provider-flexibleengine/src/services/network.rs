//! Networking v2 (Neutron compatible): floating IPs and ports

use async_trait::async_trait;
use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::quota::QuotaUsage;
use serde::Deserialize;
use serde_json::json;

use super::CloudClient;
use crate::client::field;

const VPC: &str = "vpc";

/// External network floating IPs are allocated from
pub const DEFAULT_POOL: &str = "admin_external_net";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    #[serde(rename = "floating_ip_address")]
    pub address: String,
    #[serde(rename = "floating_network_id", default)]
    pub pool: String,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(rename = "fixed_ip_address", default)]
    pub fixed_ip: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Port {
    pub id: String,
    pub device_id: String,
    pub network_id: String,
    pub fixed_ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NeutronPort {
    id: String,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    network_id: String,
    #[serde(default)]
    fixed_ips: Vec<NeutronFixedIp>,
}

#[derive(Debug, Deserialize)]
struct NeutronFixedIp {
    ip_address: String,
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn allocate_floating_ip(&self, pool: &str) -> ProviderResult<FloatingIp>;
    async fn get_floating_ip(&self, id: &str) -> ProviderResult<FloatingIp>;
    /// Floating IP holding `address`, not found when none does
    async fn find_floating_ip(&self, address: &str) -> ProviderResult<FloatingIp>;
    /// Bind to `port_id` (and `fixed_ip` on it), or unbind with `None`
    async fn associate_floating_ip(
        &self,
        id: &str,
        port_id: Option<&str>,
        fixed_ip: Option<&str>,
    ) -> ProviderResult<()>;
    async fn release_floating_ip(&self, id: &str) -> ProviderResult<()>;
    async fn list_ports(&self, device_id: &str) -> ProviderResult<Vec<Port>>;
    async fn floating_ip_quota(&self) -> ProviderResult<QuotaUsage>;
}

#[async_trait]
impl NetworkApi for CloudClient {
    async fn allocate_floating_ip(&self, pool: &str) -> ProviderResult<FloatingIp> {
        let body = self
            .rest()
            .post(
                VPC,
                "/v2.0/floatingips",
                json!({ "floatingip": { "floating_network_id": pool } }),
            )
            .await?;
        field(body, "floatingip")
    }

    async fn get_floating_ip(&self, id: &str) -> ProviderResult<FloatingIp> {
        let body = self
            .rest()
            .get(VPC, &format!("/v2.0/floatingips/{}", id))
            .await?;
        field(body, "floatingip")
    }

    async fn find_floating_ip(&self, address: &str) -> ProviderResult<FloatingIp> {
        let body = self
            .rest()
            .get(
                VPC,
                &format!("/v2.0/floatingips?floating_ip_address={}", address),
            )
            .await?;
        let mut ips: Vec<FloatingIp> = field(body, "floatingips")?;
        if ips.is_empty() {
            return Err(ProviderError::not_found(format!(
                "no floating IP with address {}",
                address
            )));
        }
        Ok(ips.remove(0))
    }

    async fn associate_floating_ip(
        &self,
        id: &str,
        port_id: Option<&str>,
        fixed_ip: Option<&str>,
    ) -> ProviderResult<()> {
        let mut update = json!({ "port_id": port_id });
        if let Some(ip) = fixed_ip {
            update["fixed_ip_address"] = json!(ip);
        }
        self.rest()
            .put(
                VPC,
                &format!("/v2.0/floatingips/{}", id),
                json!({ "floatingip": update }),
            )
            .await
            .map(|_| ())
    }

    async fn release_floating_ip(&self, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(VPC, &format!("/v2.0/floatingips/{}", id))
            .await
    }

    async fn list_ports(&self, device_id: &str) -> ProviderResult<Vec<Port>> {
        let body = self
            .rest()
            .get(VPC, &format!("/v2.0/ports?device_id={}", device_id))
            .await?;
        let ports: Vec<NeutronPort> = field(body, "ports")?;
        Ok(ports
            .into_iter()
            .map(|p| Port {
                id: p.id,
                device_id: p.device_id,
                network_id: p.network_id,
                fixed_ips: p.fixed_ips.into_iter().map(|ip| ip.ip_address).collect(),
            })
            .collect())
    }

    async fn floating_ip_quota(&self) -> ProviderResult<QuotaUsage> {
        let project_id = self.rest().project_id().await?;
        let body = self
            .rest()
            .get(VPC, &format!("/v2.0/quotas/{}/details", project_id))
            .await?;
        let entry = &body["quota"]["floatingip"];
        Ok(QuotaUsage::new(
            entry["used"].as_u64().unwrap_or(0) + entry["reserved"].as_u64().unwrap_or(0),
            entry["limit"].as_i64().and_then(|v| u64::try_from(v).ok()),
        ))
    }
}
