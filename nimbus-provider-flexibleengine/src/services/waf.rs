//! Dedicated WAF: protection policies and their precise protection rules

use async_trait::async_trait;
use nimbus_core::provider::ProviderResult;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::CloudClient;
use crate::client::{decode, encode, field};

const WAF: &str = "waf";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyAction {
    /// `log` or `block`
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    /// Protection level 1 (loose) to 3 (strict)
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default)]
    pub full_detection: bool,
    /// Creation time in milliseconds since the epoch
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicySpec {
    pub name: String,
    pub level: i64,
    pub action: PolicyAction,
    pub full_detection: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Field to match: `url`, `ip`, `params`, `cookie`, `header`, ...
    pub category: String,
    /// `contain`, `not_contain`, `equal`, `prefix`, ...
    pub logic_operation: String,
    #[serde(default)]
    pub contents: Vec<String>,
    /// Sub-field for `params`, `cookie` and `header`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    /// `block`, `pass` or `log`
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed_action_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSpec {
    pub name: String,
    pub priority: i64,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 1 enabled, 0 disabled
    pub status: i64,
    pub time: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "policyid")]
    pub policy_id: String,
    #[serde(default)]
    pub name: String,
    pub priority: i64,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: i64,
}

#[async_trait]
pub trait WafApi: Send + Sync {
    async fn create_policy(&self, spec: &PolicySpec) -> ProviderResult<Policy>;
    async fn get_policy(&self, id: &str) -> ProviderResult<Policy>;
    async fn update_policy(&self, id: &str, spec: &PolicySpec) -> ProviderResult<()>;
    async fn delete_policy(&self, id: &str) -> ProviderResult<()>;
    async fn list_policies(&self, name: Option<&str>) -> ProviderResult<Vec<Policy>>;

    async fn create_rule(&self, policy_id: &str, spec: &RuleSpec) -> ProviderResult<Rule>;
    async fn get_rule(&self, policy_id: &str, id: &str) -> ProviderResult<Rule>;
    async fn update_rule(&self, policy_id: &str, id: &str, spec: &RuleSpec) -> ProviderResult<()>;
    async fn delete_rule(&self, policy_id: &str, id: &str) -> ProviderResult<()>;
}

#[async_trait]
impl WafApi for CloudClient {
    async fn create_policy(&self, spec: &PolicySpec) -> ProviderResult<Policy> {
        let body = self
            .rest()
            .post(WAF, "/v1/{project_id}/waf/policy", json!({ "name": spec.name }))
            .await?;
        let created: Policy = decode(body, "policy")?;
        // level, action and full detection are only accepted on update
        self.update_policy(&created.id, spec).await?;
        self.get_policy(&created.id).await
    }

    async fn get_policy(&self, id: &str) -> ProviderResult<Policy> {
        let body = self
            .rest()
            .get(WAF, &format!("/v1/{{project_id}}/waf/policy/{}", id))
            .await?;
        decode(body, "policy")
    }

    async fn update_policy(&self, id: &str, spec: &PolicySpec) -> ProviderResult<()> {
        self.rest()
            .put(
                WAF,
                &format!("/v1/{{project_id}}/waf/policy/{}", id),
                encode(spec)?,
            )
            .await
            .map(|_| ())
    }

    async fn delete_policy(&self, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(WAF, &format!("/v1/{{project_id}}/waf/policy/{}", id))
            .await
    }

    async fn list_policies(&self, name: Option<&str>) -> ProviderResult<Vec<Policy>> {
        let path = match name {
            Some(name) => format!("/v1/{{project_id}}/waf/policy?pagesize=100&name={}", name),
            None => "/v1/{project_id}/waf/policy?pagesize=100".to_string(),
        };
        let body = self.rest().get(WAF, &path).await?;
        field(body, "items")
    }

    async fn create_rule(&self, policy_id: &str, spec: &RuleSpec) -> ProviderResult<Rule> {
        let body = self
            .rest()
            .post(
                WAF,
                &format!("/v1/{{project_id}}/waf/policy/{}/custom", policy_id),
                encode(spec)?,
            )
            .await?;
        decode(body, "rule")
    }

    async fn get_rule(&self, policy_id: &str, id: &str) -> ProviderResult<Rule> {
        let body = self
            .rest()
            .get(
                WAF,
                &format!("/v1/{{project_id}}/waf/policy/{}/custom/{}", policy_id, id),
            )
            .await?;
        decode(body, "rule")
    }

    async fn update_rule(&self, policy_id: &str, id: &str, spec: &RuleSpec) -> ProviderResult<()> {
        self.rest()
            .put(
                WAF,
                &format!("/v1/{{project_id}}/waf/policy/{}/custom/{}", policy_id, id),
                encode(spec)?,
            )
            .await
            .map(|_| ())
    }

    async fn delete_rule(&self, policy_id: &str, id: &str) -> ProviderResult<()> {
        self.rest()
            .delete(
                WAF,
                &format!("/v1/{{project_id}}/waf/policy/{}/custom/{}", policy_id, id),
            )
            .await
    }
}
