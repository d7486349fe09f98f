//! Cloud Eye alarm rules

use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::kind::ResourceHandler;
use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, Validator, types,
};

use super::identifier;
use crate::binder::{Args, StateBuilder, touches};
use crate::services::ces::{Alarm, AlarmAction, AlarmCondition, AlarmMetric, AlarmSpec, Dimension};
use crate::services::{Services, found};

pub struct AlarmRuleHandler {
    services: Services,
}

impl AlarmRuleHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

fn actions_schema() -> AttributeType {
    AttributeType::block(
        BlockSchema::new()
            .attribute(
                AttributeSchema::new("type", AttributeType::String)
                    .required()
                    .validate(Validator::string_in(&["notification", "autoscaling"])),
            )
            .attribute(AttributeSchema::new("notification_list", types::string_list()).required())
            .max_items(1),
    )
}

fn actions(args: &Args<'_>, name: &str) -> ProviderResult<Vec<AlarmAction>> {
    args.get_blocks(name)
        .into_iter()
        .map(|a| {
            Ok(AlarmAction {
                action_type: a.require_string("type")?,
                notification_list: a.get_string_list("notification_list"),
            })
        })
        .collect()
}

fn alarm_spec(args: &Args<'_>) -> ProviderResult<AlarmSpec> {
    let metric = args
        .get_block("metric")
        .ok_or_else(|| ProviderError::validation("metric: required block is missing"))?;
    let condition = args
        .get_block("condition")
        .ok_or_else(|| ProviderError::validation("condition: required block is missing"))?;

    let dimensions = metric
        .get_blocks("dimensions")
        .into_iter()
        .map(|d| {
            Ok(Dimension {
                name: d.require_string("name")?,
                value: d.require_string("value")?,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(AlarmSpec {
        alarm_name: args.require_string("alarm_name")?,
        alarm_description: args.get_string("alarm_description"),
        metric: AlarmMetric {
            namespace: metric.require_string("namespace")?,
            metric_name: metric.require_string("metric_name")?,
            dimensions,
        },
        condition: AlarmCondition {
            period: condition.get_int("period").unwrap_or(1),
            filter: condition.require_string("filter")?,
            comparison_operator: condition.require_string("comparison_operator")?,
            value: condition.get_float("value").unwrap_or_default(),
            unit: condition.get_string("unit").unwrap_or_default(),
            count: condition.get_int("count").unwrap_or(1),
        },
        alarm_enabled: args.get_bool("alarm_enabled").unwrap_or(true),
        alarm_action_enabled: args.get_bool("alarm_action_enabled").unwrap_or(true),
        alarm_level: args.get_int("alarm_level").unwrap_or(2),
        alarm_actions: actions(args, "alarm_actions")?,
        ok_actions: actions(args, "ok_actions")?,
    })
}

fn action_state(actions: &[AlarmAction]) -> Vec<StateBuilder> {
    actions
        .iter()
        .map(|a| {
            StateBuilder::new()
                .string("type", &a.action_type)
                .string_list("notification_list", a.notification_list.iter().cloned())
        })
        .collect()
}

fn alarm_state(alarm: &Alarm) -> HashMap<String, Value> {
    let dimensions = alarm
        .metric
        .dimensions
        .iter()
        .map(|d| StateBuilder::new().string("name", &d.name).string("value", &d.value))
        .collect();
    let metric = StateBuilder::new()
        .string("namespace", &alarm.metric.namespace)
        .string("metric_name", &alarm.metric.metric_name)
        .blocks("dimensions", dimensions);
    let condition = StateBuilder::new()
        .int("period", alarm.condition.period)
        .string("filter", &alarm.condition.filter)
        .string("comparison_operator", &alarm.condition.comparison_operator)
        .float("value", alarm.condition.value)
        .string("unit", &alarm.condition.unit)
        .int("count", alarm.condition.count);

    StateBuilder::new()
        .string("alarm_name", &alarm.alarm_name)
        .string("alarm_description", &alarm.alarm_description)
        .block("metric", metric)
        .block("condition", condition)
        .bool("alarm_enabled", alarm.alarm_enabled)
        .bool("alarm_action_enabled", alarm.alarm_action_enabled)
        .int("alarm_level", alarm.alarm_level)
        .blocks("alarm_actions", action_state(&alarm.alarm_actions))
        .blocks("ok_actions", action_state(&alarm.ok_actions))
        .string("alarm_state", &alarm.alarm_state)
        .int("update_time", alarm.update_time)
        .finish()
}

#[async_trait]
impl ResourceHandler for AlarmRuleHandler {
    fn schema(&self) -> ResourceSchema {
        let dimension = BlockSchema::new()
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("value", AttributeType::String).required())
            .min_items(1)
            .max_items(3);
        let metric = BlockSchema::new()
            .attribute(AttributeSchema::new("namespace", AttributeType::String).required())
            .attribute(AttributeSchema::new("metric_name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("dimensions", AttributeType::block(dimension)).required(),
            )
            .min_items(1)
            .max_items(1);
        let condition = BlockSchema::new()
            .attribute(
                AttributeSchema::new("period", AttributeType::Int)
                    .required()
                    .validate(Validator::IntIn(vec![1, 300, 1200, 3600, 14400, 86400])),
            )
            .attribute(
                AttributeSchema::new("filter", AttributeType::String)
                    .required()
                    .validate(Validator::string_in(&["average", "max", "min", "sum", "variance"])),
            )
            .attribute(
                AttributeSchema::new("comparison_operator", AttributeType::String)
                    .required()
                    .validate(Validator::string_in(&[">", "=", "<", ">=", "<="])),
            )
            .attribute(AttributeSchema::new("value", AttributeType::Float).required())
            .attribute(AttributeSchema::new("unit", AttributeType::String).optional())
            .attribute(
                AttributeSchema::new("count", AttributeType::Int)
                    .required()
                    .validate(Validator::IntBetween(1, 5)),
            )
            .min_items(1)
            .max_items(1);

        ResourceSchema::new("flexibleengine_ces_alarmrule")
            .with_description("A Cloud Eye alarm rule")
            .attribute(
                AttributeSchema::new("alarm_name", AttributeType::String)
                    .required()
                    .validate(Validator::regex(
                        r"^[A-Za-z0-9_\-]{1,128}$",
                        "only letters, digits, underscores and hyphens, at most 128 characters",
                    )),
            )
            .attribute(
                AttributeSchema::new("alarm_description", AttributeType::String)
                    .optional()
                    .validate(Validator::StringLenBetween(0, 256)),
            )
            .attribute(
                AttributeSchema::new("metric", AttributeType::block(metric))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("condition", AttributeType::block(condition)).required(),
            )
            .attribute(AttributeSchema::new("alarm_actions", actions_schema()).optional())
            .attribute(AttributeSchema::new("ok_actions", actions_schema()).optional())
            .attribute(
                AttributeSchema::new("alarm_level", AttributeType::Int)
                    .optional()
                    .with_default(Value::Int(2))
                    .validate(Validator::IntBetween(1, 4)),
            )
            .attribute(
                AttributeSchema::new("alarm_enabled", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(true)),
            )
            .attribute(
                AttributeSchema::new("alarm_action_enabled", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(true)),
            )
            .attribute(AttributeSchema::new("alarm_state", AttributeType::String).computed())
            .attribute(AttributeSchema::new("update_time", AttributeType::Int).computed())
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let spec = alarm_spec(&Args::of(desired))?;
        ctx.run(self.services.ces.create_alarm(&spec)).await
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let alarm = found(ctx.run(self.services.ces.get_alarm(id)).await)?;
        Ok(alarm.as_ref().map(alarm_state))
    }

    /// Enabling and disabling goes through its own action; everything else is
    /// a full rewrite of the rule
    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        changed: &[String],
    ) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let spec = alarm_spec(&Args::of(desired))?;
        if changed.iter().any(|path| path != "alarm_enabled") {
            ctx.run(self.services.ces.update_alarm(id, &spec)).await?;
        }
        if touches(changed, "alarm_enabled") {
            log::info!(
                "{} alarm rule {}",
                if spec.alarm_enabled { "enabling" } else { "disabling" },
                id
            );
            ctx.run(self.services.ces.set_alarm_enabled(id, spec.alarm_enabled))
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        ctx.run(self.services.ces.delete_alarm(id)).await
    }
}
