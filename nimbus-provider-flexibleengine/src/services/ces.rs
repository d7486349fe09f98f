//! Cloud Eye (CES) alarm rules

use async_trait::async_trait;
use nimbus_core::provider::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::CloudClient;
use crate::client::{encode, field};

const CES: &str = "ces";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmMetric {
    pub namespace: String,
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmCondition {
    /// Aggregation period in seconds
    pub period: i64,
    /// `average`, `max`, `min`, `sum` or `variance`
    pub filter: String,
    pub comparison_operator: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    /// Consecutive periods before the alarm fires
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(rename = "notificationList", default)]
    pub notification_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlarmSpec {
    pub alarm_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_description: Option<String>,
    pub metric: AlarmMetric,
    pub condition: AlarmCondition,
    pub alarm_enabled: bool,
    pub alarm_action_enabled: bool,
    pub alarm_level: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alarm_actions: Vec<AlarmAction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ok_actions: Vec<AlarmAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Alarm {
    pub alarm_id: String,
    pub alarm_name: String,
    #[serde(default)]
    pub alarm_description: String,
    pub metric: AlarmMetric,
    pub condition: AlarmCondition,
    pub alarm_enabled: bool,
    #[serde(default)]
    pub alarm_action_enabled: bool,
    #[serde(default)]
    pub alarm_level: i64,
    #[serde(default)]
    pub alarm_actions: Vec<AlarmAction>,
    #[serde(default)]
    pub ok_actions: Vec<AlarmAction>,
    /// `ok`, `alarm` or `insufficient_data`
    #[serde(default)]
    pub alarm_state: String,
    /// Last update, milliseconds since the epoch
    #[serde(default)]
    pub update_time: i64,
}

#[async_trait]
pub trait CesApi: Send + Sync {
    async fn create_alarm(&self, spec: &AlarmSpec) -> ProviderResult<String>;
    async fn get_alarm(&self, id: &str) -> ProviderResult<Alarm>;
    async fn update_alarm(&self, id: &str, spec: &AlarmSpec) -> ProviderResult<()>;
    async fn set_alarm_enabled(&self, id: &str, enabled: bool) -> ProviderResult<()>;
    async fn delete_alarm(&self, id: &str) -> ProviderResult<()>;
}

#[async_trait]
impl CesApi for CloudClient {
    async fn create_alarm(&self, spec: &AlarmSpec) -> ProviderResult<String> {
        let body = self
            .rest()
            .post(CES, "/V1.0/{project_id}/alarms", encode(spec)?)
            .await?;
        field(body, "alarm_id")
    }

    async fn get_alarm(&self, id: &str) -> ProviderResult<Alarm> {
        let body = self
            .rest()
            .get(CES, &format!("/V1.0/{{project_id}}/alarms/{}", id))
            .await?;
        let mut alarms: Vec<Alarm> = field(body, "metric_alarms")?;
        if alarms.is_empty() {
            return Err(ProviderError::not_found(format!("alarm rule {} not found", id)));
        }
        Ok(alarms.remove(0))
    }

    async fn update_alarm(&self, id: &str, spec: &AlarmSpec) -> ProviderResult<()> {
        // metric and enablement cannot be changed through this call
        let update = json!({
            "alarm_name": spec.alarm_name,
            "alarm_description": spec.alarm_description.clone().unwrap_or_default(),
            "condition": spec.condition,
            "alarm_action_enabled": spec.alarm_action_enabled,
            "alarm_level": spec.alarm_level,
            "alarm_actions": spec.alarm_actions,
            "ok_actions": spec.ok_actions,
        });
        self.rest()
            .put(CES, &format!("/V1.0/{{project_id}}/alarms/{}", id), update)
            .await
            .map(|_| ())
    }

    async fn set_alarm_enabled(&self, id: &str, enabled: bool) -> ProviderResult<()> {
        self.rest()
            .put(
                CES,
                &format!("/V1.0/{{project_id}}/alarms/{}/action", id),
                json!({ "alarm_enabled": enabled }),
            )
            .await
            .map(|_| ())
    }

    async fn delete_alarm(&self, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(CES, &format!("/V1.0/{{project_id}}/alarms/{}", id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_encodes_vendor_field_names() {
        let spec = AlarmSpec {
            alarm_name: "cpu".to_string(),
            alarm_actions: vec![AlarmAction {
                action_type: "notification".to_string(),
                notification_list: vec!["urn:smn:topic".to_string()],
            }],
            ..Default::default()
        };
        let json = encode(&spec).unwrap();
        assert_eq!(json["alarm_actions"][0]["type"], "notification");
        assert_eq!(json["alarm_actions"][0]["notificationList"][0], "urn:smn:topic");
        assert!(json.get("ok_actions").is_none());
        assert!(json.get("alarm_description").is_none());
    }
}
