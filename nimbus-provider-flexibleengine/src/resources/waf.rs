//! Dedicated WAF policies and precise protection rules

use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::identifier::{IdShape, Identifier};
use nimbus_core::kind::ResourceHandler;
use nimbus_core::provider::ProviderResult;
use nimbus_core::quota::{QuotaKind, QuotaRequest};
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, Validator, types,
};

use super::{identifier, nested_parts};
use crate::binder::{Args, StateBuilder};
use crate::services::waf::{
    Policy, PolicyAction, PolicySpec, Rule, RuleAction, RuleCondition, RuleSpec,
};
use crate::services::{Services, found};

// =============================================================================
// flexibleengine_waf_dedicated_policy
// =============================================================================

pub struct PolicyHandler {
    services: Services,
}

impl PolicyHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

fn policy_spec(args: &Args<'_>) -> ProviderResult<PolicySpec> {
    Ok(PolicySpec {
        name: args.require_string("name")?,
        level: args.get_int("level").unwrap_or(2),
        action: PolicyAction {
            category: args
                .get_string("protection_mode")
                .unwrap_or_else(|| "log".to_string()),
        },
        full_detection: args.get_bool("full_detection").unwrap_or(false),
    })
}

pub(crate) fn policy_state(policy: &Policy) -> StateBuilder {
    StateBuilder::new()
        .string("name", &policy.name)
        .int("level", policy.level)
        .string("protection_mode", &policy.action.category)
        .bool("full_detection", policy.full_detection)
}

#[async_trait]
impl ResourceHandler for PolicyHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_waf_dedicated_policy")
            .with_description("A dedicated WAF protection policy")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .validate(Validator::regex(
                        r"^[A-Za-z0-9_.]{1,64}$",
                        "only letters, digits, underscores and dots, at most 64 characters",
                    )),
            )
            .attribute(
                AttributeSchema::new("level", AttributeType::Int)
                    .optional()
                    .with_default(Value::Int(2))
                    .validate(Validator::IntIn(vec![1, 2, 3])),
            )
            .attribute(
                AttributeSchema::new("protection_mode", AttributeType::String)
                    .optional()
                    .with_default(Value::string("log"))
                    .validate(Validator::string_in(&["log", "block"])),
            )
            .attribute(
                AttributeSchema::new("full_detection", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(false)),
            )
    }

    async fn quota_demand(
        &self,
        _ctx: &OpContext,
        _desired: &Resource,
    ) -> ProviderResult<Vec<QuotaRequest>> {
        Ok(vec![QuotaRequest::new(QuotaKind::WafPolicies, 1)])
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let spec = policy_spec(&Args::of(desired))?;
        let policy = ctx.run(self.services.waf.create_policy(&spec)).await?;
        Ok(policy.id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let policy = found(ctx.run(self.services.waf.get_policy(id)).await)?;
        Ok(policy.map(|p| policy_state(&p).finish()))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        _changed: &[String],
    ) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let spec = policy_spec(&Args::of(desired))?;
        ctx.run(self.services.waf.update_policy(id, &spec)).await
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        ctx.run(self.services.waf.delete_policy(id)).await
    }
}

// =============================================================================
// flexibleengine_waf_dedicated_precise_protection_rule
// =============================================================================

/// Identified by `<policy_id>/<rule_id>`
pub struct PreciseRuleHandler {
    services: Services,
}

impl PreciseRuleHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

fn rule_spec(args: &Args<'_>) -> ProviderResult<RuleSpec> {
    let conditions = args
        .get_blocks("conditions")
        .into_iter()
        .map(|c| {
            Ok(RuleCondition {
                category: c.require_string("category")?,
                logic_operation: c.require_string("logic_operation")?,
                contents: c.get_string_list("contents"),
                index: c.get_string("index"),
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;
    let action = match args.get_block("action") {
        Some(a) => RuleAction {
            category: a.get_string("category").unwrap_or_else(|| "block".to_string()),
            followed_action_id: a.get_string("followed_action_id"),
        },
        None => RuleAction {
            category: "block".to_string(),
            followed_action_id: None,
        },
    };
    Ok(RuleSpec {
        name: args.get_string("name").unwrap_or_default(),
        priority: args.get_int("priority").unwrap_or_default(),
        conditions,
        action,
        description: args.get_string("description"),
        status: args.get_int("status").unwrap_or(1),
        time: false,
    })
}

fn rule_state(rule: &Rule) -> HashMap<String, Value> {
    let conditions = rule
        .conditions
        .iter()
        .map(|c| {
            StateBuilder::new()
                .string("category", &c.category)
                .string("logic_operation", &c.logic_operation)
                .string_list("contents", &c.contents)
                .opt_string("index", c.index.clone())
        })
        .collect();
    StateBuilder::new()
        .id("policy_id", &rule.policy_id)
        .string("name", &rule.name)
        .opt_string("description", rule.description.clone())
        .int("priority", rule.priority)
        .int("status", rule.status)
        .blocks("conditions", conditions)
        .block(
            "action",
            StateBuilder::new()
                .string("category", &rule.action.category)
                .opt_string("followed_action_id", rule.action.followed_action_id.clone()),
        )
        .finish()
}

#[async_trait]
impl ResourceHandler for PreciseRuleHandler {
    fn schema(&self) -> ResourceSchema {
        let condition = BlockSchema::new()
            .attribute(
                AttributeSchema::new("category", AttributeType::String)
                    .required()
                    .validate(Validator::string_in(&[
                        "url", "user-agent", "ip", "params", "cookie", "referer", "header",
                        "request_line", "request", "method",
                    ])),
            )
            .attribute(
                AttributeSchema::new("logic_operation", AttributeType::String)
                    .required()
                    .validate(Validator::string_in(&[
                        "contain", "not_contain", "equal", "not_equal", "prefix", "not_prefix",
                        "suffix", "not_suffix", "len_greater", "len_less", "len_equal",
                        "len_not_equal", "equal_any", "not_equal_all",
                    ])),
            )
            .attribute(AttributeSchema::new("contents", types::string_list()).optional())
            .attribute(AttributeSchema::new("index", AttributeType::String).optional())
            .min_items(1)
            .max_items(30);
        let action = BlockSchema::new()
            .attribute(
                AttributeSchema::new("category", AttributeType::String)
                    .optional()
                    .with_default(Value::string("block"))
                    .validate(Validator::string_in(&["block", "pass", "log"])),
            )
            .attribute(AttributeSchema::new("followed_action_id", AttributeType::String).optional())
            .max_items(1);

        ResourceSchema::new("flexibleengine_waf_dedicated_precise_protection_rule")
            .with_description("A precise protection rule inside a dedicated WAF policy")
            .attribute(
                AttributeSchema::new("policy_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String).optional())
            .attribute(AttributeSchema::new("description", AttributeType::String).optional())
            .attribute(
                AttributeSchema::new("priority", AttributeType::Int)
                    .required()
                    .validate(Validator::IntBetween(0, 1000)),
            )
            .attribute(
                AttributeSchema::new("status", AttributeType::Int)
                    .optional()
                    .with_default(Value::Int(1))
                    .validate(Validator::IntIn(vec![0, 1])),
            )
            .attribute(
                AttributeSchema::new("conditions", AttributeType::block(condition)).required(),
            )
            .attribute(
                AttributeSchema::new("action", AttributeType::block(action))
                    .optional()
                    .computed(),
            )
    }

    fn id_shape(&self) -> IdShape {
        IdShape::Nested
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let policy_id = args.require_string("policy_id")?;
        let rule = ctx
            .run(self.services.waf.create_rule(&policy_id, &rule_spec(&args)?))
            .await?;
        Ok(Identifier::nested(policy_id, rule.id).to_string())
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let (policy_id, rule_id) = nested_parts(prior)?;
        let rule = found(ctx.run(self.services.waf.get_rule(&policy_id, &rule_id)).await)?;
        Ok(rule.as_ref().map(rule_state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        _changed: &[String],
    ) -> ProviderResult<()> {
        let (policy_id, rule_id) = nested_parts(prior)?;
        let spec = rule_spec(&Args::of(desired))?;
        ctx.run(self.services.waf.update_rule(&policy_id, &rule_id, &spec))
            .await
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let (policy_id, rule_id) = nested_parts(prior)?;
        ctx.run(self.services.waf.delete_rule(&policy_id, &rule_id)).await
    }
}
