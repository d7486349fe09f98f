//! VPCs and subnets

use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::kind::{ResourceHandler, keep_identifier};
use nimbus_core::provider::ProviderResult;
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator, types};
use nimbus_core::waiter::wait_for_state;

use super::{identifier, observed};
use crate::binder::{Args, StateBuilder, tags_diff, touches};
use crate::services::vpc::{Subnet, SubnetSpec, TagTarget, Vpc, VpcSpec};
use crate::services::{Services, found};

/// Push tag changes between the prior and desired `tags` maps
async fn sync_tags(
    services: &Services,
    ctx: &OpContext,
    target: TagTarget,
    id: &str,
    prior: &Args<'_>,
    desired: &Args<'_>,
) -> ProviderResult<()> {
    let (set, remove) = tags_diff(&prior.get_string_map("tags"), &desired.get_string_map("tags"));
    if !set.is_empty() {
        ctx.run(services.vpc.add_tags(target, id, &set)).await?;
    }
    if !remove.is_empty() {
        ctx.run(services.vpc.remove_tags(target, id, &remove)).await?;
    }
    Ok(())
}

// =============================================================================
// flexibleengine_vpc_v1
// =============================================================================

pub struct VpcHandler {
    services: Services,
}

impl VpcHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

fn vpc_spec(args: &Args<'_>) -> ProviderResult<VpcSpec> {
    Ok(VpcSpec {
        name: args.require_string("name")?,
        cidr: args.require_string("cidr")?,
        description: args.get_string("description"),
    })
}

#[async_trait]
impl ResourceHandler for VpcHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_vpc_v1")
            .with_description("A virtual private cloud")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .validate(Validator::StringLenBetween(1, 64)),
            )
            .attribute(
                AttributeSchema::new("cidr", AttributeType::String)
                    .required()
                    .validate(Validator::Cidr),
            )
            .attribute(
                AttributeSchema::new("description", AttributeType::String)
                    .optional()
                    .validate(Validator::StringLenBetween(0, 255)),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()).optional())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let api = &*self.services.vpc;
        let id = ctx.run(api.create_vpc(&vpc_spec(&args)?)).await?;

        let settled = async {
            let vpc_id = id.as_str();
            let wait = self.services.polling.until(&["CREATING"], &["OK"], ctx.remaining());
            wait_for_state(ctx, &wait, move || async move {
                observed(api.get_vpc(vpc_id).await, |v: &Vpc| v.status.clone())
            })
            .await?;
            let none = HashMap::new();
            sync_tags(&self.services, ctx, TagTarget::Vpc, &id, &Args::new(&none), &args).await
        };
        keep_identifier(settled.await, &id)?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let vpc = found(ctx.run(self.services.vpc.get_vpc(id)).await)?;
        Ok(vpc.map(|v| {
            StateBuilder::new()
                .string("name", v.name)
                .cidr("cidr", &v.cidr)
                .string("description", v.description)
                .string_map("tags", &v.tags)
                .string("status", v.status)
                .finish()
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        changed: &[String],
    ) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let args = Args::of(desired);
        if ["name", "cidr", "description"].iter().any(|a| touches(changed, a)) {
            ctx.run(self.services.vpc.update_vpc(id, &vpc_spec(&args)?)).await?;
        }
        if touches(changed, "tags") {
            sync_tags(&self.services, ctx, TagTarget::Vpc, id, &Args::new(&prior.attributes), &args)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let api = &*self.services.vpc;
        ctx.run(api.delete_vpc(id)).await?;
        let wait = self.services.polling.until_deleted(&["OK"], ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_vpc(id).await, |v: &Vpc| v.status.clone())
        })
        .await
        .map(|_| ())
    }
}

// =============================================================================
// flexibleengine_vpc_subnet_v1
// =============================================================================

pub struct SubnetHandler {
    services: Services,
}

impl SubnetHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

fn subnet_spec(args: &Args<'_>) -> ProviderResult<SubnetSpec> {
    Ok(SubnetSpec {
        name: args.require_string("name")?,
        cidr: args.require_string("cidr")?,
        gateway_ip: args.require_string("gateway_ip")?,
        vpc_id: args.require_string("vpc_id")?,
        dhcp_enable: args.get_bool("dhcp_enable").unwrap_or(true),
        primary_dns: args.get_string("primary_dns"),
        secondary_dns: args.get_string("secondary_dns"),
        dns_list: args.get_string_list("dns_list"),
        availability_zone: args.get_string("availability_zone"),
    })
}

#[async_trait]
impl ResourceHandler for SubnetHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_vpc_subnet_v1")
            .with_description("A subnet inside a VPC")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .validate(Validator::StringLenBetween(1, 64)),
            )
            .attribute(
                AttributeSchema::new("cidr", AttributeType::String)
                    .required()
                    .force_new()
                    .validate(Validator::Cidr),
            )
            .attribute(
                AttributeSchema::new("gateway_ip", AttributeType::String)
                    .required()
                    .force_new()
                    .validate(Validator::IpAddress),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("dhcp_enable", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(true)),
            )
            .attribute(
                AttributeSchema::new("primary_dns", AttributeType::String)
                    .optional()
                    .computed()
                    .validate(Validator::IpAddress),
            )
            .attribute(
                AttributeSchema::new("secondary_dns", AttributeType::String)
                    .optional()
                    .computed()
                    .validate(Validator::IpAddress),
            )
            .attribute(
                AttributeSchema::new("dns_list", types::string_list())
                    .optional()
                    .computed()
                    .validate(Validator::IpAddress),
            )
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()).optional())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .computed()
                    .with_description("Neutron subnet id"),
            )
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let api = &*self.services.vpc;
        let id = ctx.run(api.create_subnet(&subnet_spec(&args)?)).await?;

        let settled = async {
            let subnet_id = id.as_str();
            let wait = self.services.polling.until(&["UNKNOWN"], &["ACTIVE"], ctx.remaining());
            wait_for_state(ctx, &wait, move || async move {
                observed(api.get_subnet(subnet_id).await, |s: &Subnet| s.status.clone())
            })
            .await?;
            let none = HashMap::new();
            sync_tags(&self.services, ctx, TagTarget::Subnet, &id, &Args::new(&none), &args).await
        };
        keep_identifier(settled.await, &id)?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let subnet = found(ctx.run(self.services.vpc.get_subnet(id)).await)?;
        Ok(subnet.map(|s| {
            StateBuilder::new()
                .string("name", s.name)
                .cidr("cidr", &s.cidr)
                .string("gateway_ip", s.gateway_ip)
                .id("vpc_id", &s.vpc_id)
                .bool("dhcp_enable", s.dhcp_enable)
                .string("primary_dns", s.primary_dns)
                .string("secondary_dns", s.secondary_dns)
                .string_list("dns_list", s.dns_list)
                .string("availability_zone", s.availability_zone)
                .string_map("tags", &s.tags)
                .string("status", s.status)
                .id("subnet_id", &s.neutron_subnet_id)
                .finish()
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        changed: &[String],
    ) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let args = Args::of(desired);
        let updatable = ["name", "dhcp_enable", "primary_dns", "secondary_dns", "dns_list"];
        if updatable.iter().any(|a| touches(changed, a)) {
            ctx.run(self.services.vpc.update_subnet(id, &subnet_spec(&args)?)).await?;
        }
        if touches(changed, "tags") {
            sync_tags(
                &self.services,
                ctx,
                TagTarget::Subnet,
                id,
                &Args::new(&prior.attributes),
                &args,
            )
            .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let api = &*self.services.vpc;
        let subnet = ctx.run(api.get_subnet(id)).await?;
        ctx.run(api.delete_subnet(&subnet.vpc_id, id)).await?;
        let wait = self.services.polling.until_deleted(&["ACTIVE"], ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_subnet(id).await, |s: &Subnet| s.status.clone())
        })
        .await
        .map(|_| ())
    }
}
