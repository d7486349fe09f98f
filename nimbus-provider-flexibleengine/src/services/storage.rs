//! EVS block storage (Cinder v2 compatible)

use std::collections::BTreeMap;

use async_trait::async_trait;
use nimbus_core::provider::ProviderResult;
use nimbus_core::quota::QuotaUsage;
use serde::Deserialize;
use serde_json::{Value as Json, json};

use super::CloudClient;
use crate::client::field;

const EVS: &str = "evs";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeCreate {
    pub name: String,
    /// Size in GB
    pub size: u64,
    pub volume_type: Option<String>,
    pub availability_zone: Option<String>,
    pub description: Option<String>,
    pub image_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VolumeAttachmentInfo {
    pub server_id: String,
    pub attachment_id: String,
    #[serde(default)]
    pub device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub volume_type: String,
    #[serde(default)]
    pub availability_zone: String,
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<VolumeAttachmentInfo>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeQuotas {
    pub volumes: QuotaUsage,
    pub gigabytes: QuotaUsage,
}

#[async_trait]
pub trait BlockStorageApi: Send + Sync {
    async fn create_volume(&self, spec: &VolumeCreate) -> ProviderResult<String>;
    async fn get_volume(&self, id: &str) -> ProviderResult<Volume>;
    async fn update_volume(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> ProviderResult<()>;
    async fn extend_volume(&self, id: &str, new_size: u64) -> ProviderResult<()>;
    async fn delete_volume(&self, id: &str) -> ProviderResult<()>;
    async fn volume_quotas(&self) -> ProviderResult<VolumeQuotas>;
}

fn quota(set: &Json, key: &str) -> QuotaUsage {
    let entry = &set[key];
    QuotaUsage::new(
        entry["in_use"].as_u64().unwrap_or(0),
        entry["limit"].as_i64().and_then(|v| u64::try_from(v).ok()),
    )
}

#[async_trait]
impl BlockStorageApi for CloudClient {
    async fn create_volume(&self, spec: &VolumeCreate) -> ProviderResult<String> {
        let mut volume = json!({
            "name": spec.name,
            "size": spec.size,
            "metadata": spec.metadata,
        });
        for (key, value) in [
            ("volume_type", &spec.volume_type),
            ("availability_zone", &spec.availability_zone),
            ("description", &spec.description),
            ("imageRef", &spec.image_id),
            ("snapshot_id", &spec.snapshot_id),
        ] {
            if let Some(value) = value {
                volume[key] = json!(value);
            }
        }
        let body = self
            .rest()
            .post(EVS, "/v2/{project_id}/volumes", json!({ "volume": volume }))
            .await?;
        let created: Volume = field(body, "volume")?;
        Ok(created.id)
    }

    async fn get_volume(&self, id: &str) -> ProviderResult<Volume> {
        let body = self
            .rest()
            .get(EVS, &format!("/v2/{{project_id}}/volumes/{}", id))
            .await?;
        field(body, "volume")
    }

    async fn update_volume(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> ProviderResult<()> {
        self.rest()
            .put(
                EVS,
                &format!("/v2/{{project_id}}/volumes/{}", id),
                json!({
                    "volume": { "name": name, "description": description.unwrap_or_default() }
                }),
            )
            .await
            .map(|_| ())
    }

    async fn extend_volume(&self, id: &str, new_size: u64) -> ProviderResult<()> {
        self.rest()
            .post(
                EVS,
                &format!("/v2/{{project_id}}/volumes/{}/action", id),
                json!({ "os-extend": { "new_size": new_size } }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_volume(&self, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(EVS, &format!("/v2/{{project_id}}/volumes/{}", id))
            .await
    }

    async fn volume_quotas(&self) -> ProviderResult<VolumeQuotas> {
        let project_id = self.rest().project_id().await?;
        let body = self
            .rest()
            .get(
                EVS,
                &format!("/v2/{{project_id}}/os-quota-sets/{}?usage=True", project_id),
            )
            .await?;
        let set = &body["quota_set"];
        Ok(VolumeQuotas {
            volumes: quota(set, "volumes"),
            gigabytes: quota(set, "gigabytes"),
        })
    }
}
