//! Enterprise Router: instances, VPC attachments, route tables and static
//! routes
//!
//! Attachments and route tables carry their router in `instance_id` and are
//! imported as `<instance_id>/<id>`. Static routes are addressed as
//! `<route_table_id>/<id>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::context::{OpContext, Timeouts};
use nimbus_core::identifier::{IdShape, Identifier};
use nimbus_core::kind::{ResourceHandler, keep_identifier};
use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::resource::{Resource, ResourceId, State, Value};
use nimbus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator, types};
use nimbus_core::waiter::{WaitDescriptor, wait_for_state};

use super::{identifier, nested_parts, observed};
use crate::binder::{Args, StateBuilder, touches};
use crate::services::er::{AttachmentSpec, InstanceSpec, RouteTableSpec, StaticRouteSpec};
use crate::services::{Services, found};

const PENDING: &[&str] = &["pending", "updating"];
const AVAILABLE: &[&str] = &["available"];
const DELETING: &[&str] = &["deleting", "available"];

fn er_timeouts() -> Timeouts {
    Timeouts::default()
        .with_create(Duration::from_secs(10 * 60))
        .with_update(Duration::from_secs(10 * 60))
        .with_delete(Duration::from_secs(5 * 60))
}

/// Router an attachment or route table belongs to
fn instance_of(prior: &State) -> ProviderResult<(String, String)> {
    let id = identifier(prior)?;
    let instance_id = prior
        .get("instance_id")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| ProviderError::not_found(format!("{} has no instance_id", id)))?;
    Ok((instance_id, id.to_string()))
}

/// Seed an import of `<instance_id>/<id>`
fn import_child(id: &ResourceId, identifier: &Identifier) -> ProviderResult<State> {
    let instance_id = identifier
        .parent()
        .ok_or_else(|| ProviderError::validation("expected <instance_id>/<id>"))?;
    let attributes = HashMap::from([("instance_id".to_string(), Value::string(instance_id))]);
    Ok(State::existing(id.clone(), attributes).with_identifier(identifier.child()))
}

fn description_attr() -> AttributeSchema {
    AttributeSchema::new("description", AttributeType::String)
        .optional()
        .validate(Validator::StringLenBetween(0, 255))
}

fn name_attr() -> AttributeSchema {
    AttributeSchema::new("name", AttributeType::String)
        .required()
        .validate(Validator::regex(
            r"^[\w.\-\p{Han}]{1,64}$",
            "only letters, digits, underscores, hyphens and dots, at most 64 characters",
        ))
}

// =============================================================================
// flexibleengine_er_instance
// =============================================================================

pub struct InstanceHandler {
    services: Services,
}

impl InstanceHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn wait(&self, ctx: &OpContext, id: &str, wait: WaitDescriptor) -> ProviderResult<()> {
        let api = &*self.services.er;
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_instance(id).await, |i| i.state.clone())
        })
        .await
        .map(|_| ())
    }
}

fn instance_spec(args: &Args<'_>) -> ProviderResult<InstanceSpec> {
    Ok(InstanceSpec {
        name: args.require_string("name")?,
        asn: args
            .get_int("asn")
            .ok_or_else(|| ProviderError::validation("asn: required argument is missing"))?,
        description: args.get_string("description"),
        availability_zone_ids: args.get_string_list("availability_zones"),
        enable_default_propagation: args.get_bool("enable_default_propagation").unwrap_or(false),
        enable_default_association: args.get_bool("enable_default_association").unwrap_or(false),
        auto_accept_shared_attachments: args
            .get_bool("auto_accept_shared_attachments")
            .unwrap_or(false),
    })
}

#[async_trait]
impl ResourceHandler for InstanceHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_er_instance")
            .with_description("An Enterprise Router instance")
            .attribute(name_attr())
            .attribute(
                AttributeSchema::new("asn", AttributeType::Int)
                    .required()
                    .force_new()
                    .validate(Validator::IntBetween(64512, 4_294_967_295)),
            )
            .attribute(
                AttributeSchema::new("availability_zones", types::string_list())
                    .required()
                    .force_new(),
            )
            .attribute(description_attr())
            .attribute(
                AttributeSchema::new("enable_default_propagation", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(false)),
            )
            .attribute(
                AttributeSchema::new("enable_default_association", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(false)),
            )
            .attribute(
                AttributeSchema::new("auto_accept_shared_attachments", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(false)),
            )
            .attribute(
                AttributeSchema::new("default_propagation_route_table_id", AttributeType::String)
                    .computed(),
            )
            .attribute(
                AttributeSchema::new("default_association_route_table_id", AttributeType::String)
                    .computed(),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    fn timeouts(&self) -> Timeouts {
        er_timeouts()
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let spec = instance_spec(&Args::of(desired))?;
        let id = ctx.run(self.services.er.create_instance(&spec)).await?;
        let wait = self.services.polling.until(PENDING, AVAILABLE, ctx.remaining());
        keep_identifier(self.wait(ctx, &id, wait).await, &id)?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let instance = found(ctx.run(self.services.er.get_instance(id)).await)?;
        Ok(instance.map(|i| {
            StateBuilder::new()
                .string("name", i.name)
                .int("asn", i.asn)
                .string_list("availability_zones", i.availability_zone_ids)
                .string("description", i.description)
                .bool("enable_default_propagation", i.enable_default_propagation)
                .bool("enable_default_association", i.enable_default_association)
                .bool("auto_accept_shared_attachments", i.auto_accept_shared_attachments)
                .string(
                    "default_propagation_route_table_id",
                    i.default_propagation_route_table_id,
                )
                .string(
                    "default_association_route_table_id",
                    i.default_association_route_table_id,
                )
                .string("status", i.state)
                .string("created_at", i.created_at)
                .finish()
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        _changed: &[String],
    ) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let spec = instance_spec(&Args::of(desired))?;
        ctx.run(self.services.er.update_instance(id, &spec)).await?;
        let wait = self.services.polling.until(PENDING, AVAILABLE, ctx.remaining());
        self.wait(ctx, id, wait).await
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        ctx.run(self.services.er.delete_instance(id)).await?;
        let wait = self.services.polling.until_deleted(DELETING, ctx.remaining());
        self.wait(ctx, id, wait).await
    }
}

// =============================================================================
// flexibleengine_er_vpc_attachment
// =============================================================================

pub struct VpcAttachmentHandler {
    services: Services,
}

impl VpcAttachmentHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn wait(
        &self,
        ctx: &OpContext,
        instance_id: &str,
        id: &str,
        wait: WaitDescriptor,
    ) -> ProviderResult<()> {
        let api = &*self.services.er;
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_vpc_attachment(instance_id, id).await, |a| a.state.clone())
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ResourceHandler for VpcAttachmentHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_er_vpc_attachment")
            .with_description("Attaches a VPC subnet to an Enterprise Router")
            .attribute(
                AttributeSchema::new("instance_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(name_attr())
            .attribute(description_attr())
            .attribute(
                AttributeSchema::new("auto_create_vpc_routes", AttributeType::Bool)
                    .optional()
                    .force_new()
                    .with_default(Value::Bool(false)),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    fn timeouts(&self) -> Timeouts {
        er_timeouts()
    }

    fn id_shape(&self) -> IdShape {
        IdShape::Nested
    }

    fn import(&self, id: &ResourceId, identifier: &Identifier) -> ProviderResult<State> {
        import_child(id, identifier)
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let instance_id = args.require_string("instance_id")?;
        let spec = AttachmentSpec {
            name: args.require_string("name")?,
            vpc_id: args.require_string("vpc_id")?,
            virsubnet_id: args.require_string("subnet_id")?,
            description: args.get_string("description"),
            auto_create_vpc_routes: args.get_bool("auto_create_vpc_routes").unwrap_or(false),
        };
        let attachment_id = ctx
            .run(self.services.er.create_vpc_attachment(&instance_id, &spec))
            .await?;
        let wait = self.services.polling.until(PENDING, AVAILABLE, ctx.remaining());
        keep_identifier(
            self.wait(ctx, &instance_id, &attachment_id, wait).await,
            &attachment_id,
        )?;
        Ok(attachment_id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let (instance_id, id) = instance_of(prior)?;
        let attachment = found(
            ctx.run(self.services.er.get_vpc_attachment(&instance_id, &id))
                .await,
        )?;
        Ok(attachment.map(|a| {
            StateBuilder::new()
                .id("instance_id", &instance_id)
                .id("vpc_id", &a.vpc_id)
                .id("subnet_id", &a.virsubnet_id)
                .string("name", a.name)
                .string("description", a.description)
                .bool("auto_create_vpc_routes", a.auto_create_vpc_routes)
                .string("status", a.state)
                .string("created_at", a.created_at)
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
        let (instance_id, id) = instance_of(prior)?;
        if touches(changed, "name") || touches(changed, "description") {
            let args = Args::of(desired);
            let name = args.require_string("name")?;
            let description = args.get_string("description");
            ctx.run(self.services.er.update_vpc_attachment(
                &instance_id,
                &id,
                &name,
                description.as_deref(),
            ))
            .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let (instance_id, id) = instance_of(prior)?;
        ctx.run(self.services.er.delete_vpc_attachment(&instance_id, &id))
            .await?;
        let wait = self.services.polling.until_deleted(DELETING, ctx.remaining());
        self.wait(ctx, &instance_id, &id, wait).await
    }
}

// =============================================================================
// flexibleengine_er_route_table
// =============================================================================

pub struct RouteTableHandler {
    services: Services,
}

impl RouteTableHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn wait(
        &self,
        ctx: &OpContext,
        instance_id: &str,
        id: &str,
        wait: WaitDescriptor,
    ) -> ProviderResult<()> {
        let api = &*self.services.er;
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_route_table(instance_id, id).await, |t| t.state.clone())
        })
        .await
        .map(|_| ())
    }
}

fn route_table_spec(args: &Args<'_>) -> ProviderResult<RouteTableSpec> {
    Ok(RouteTableSpec {
        name: args.require_string("name")?,
        description: args.get_string("description"),
    })
}

#[async_trait]
impl ResourceHandler for RouteTableHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_er_route_table")
            .with_description("A route table of an Enterprise Router")
            .attribute(
                AttributeSchema::new("instance_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(name_attr())
            .attribute(description_attr())
            .attribute(
                AttributeSchema::new("is_default_association", AttributeType::Bool).computed(),
            )
            .attribute(
                AttributeSchema::new("is_default_propagation", AttributeType::Bool).computed(),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    fn timeouts(&self) -> Timeouts {
        er_timeouts()
    }

    fn id_shape(&self) -> IdShape {
        IdShape::Nested
    }

    fn import(&self, id: &ResourceId, identifier: &Identifier) -> ProviderResult<State> {
        import_child(id, identifier)
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let instance_id = args.require_string("instance_id")?;
        let table_id = ctx
            .run(
                self.services
                    .er
                    .create_route_table(&instance_id, &route_table_spec(&args)?),
            )
            .await?;
        let wait = self.services.polling.until(PENDING, AVAILABLE, ctx.remaining());
        keep_identifier(self.wait(ctx, &instance_id, &table_id, wait).await, &table_id)?;
        Ok(table_id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let (instance_id, id) = instance_of(prior)?;
        let table = found(ctx.run(self.services.er.get_route_table(&instance_id, &id)).await)?;
        Ok(table.map(|t| {
            StateBuilder::new()
                .id("instance_id", &instance_id)
                .string("name", t.name)
                .string("description", t.description)
                .bool("is_default_association", t.is_default_association)
                .bool("is_default_propagation", t.is_default_propagation)
                .string("status", t.state)
                .string("created_at", t.created_at)
                .finish()
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        _changed: &[String],
    ) -> ProviderResult<()> {
        let (instance_id, id) = instance_of(prior)?;
        let spec = route_table_spec(&Args::of(desired))?;
        ctx.run(self.services.er.update_route_table(&instance_id, &id, &spec))
            .await
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let (instance_id, id) = instance_of(prior)?;
        ctx.run(self.services.er.delete_route_table(&instance_id, &id))
            .await?;
        let wait = self.services.polling.until_deleted(DELETING, ctx.remaining());
        self.wait(ctx, &instance_id, &id, wait).await
    }
}

// =============================================================================
// flexibleengine_er_static_route
// =============================================================================

pub struct StaticRouteHandler {
    services: Services,
}

impl StaticRouteHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn wait(
        &self,
        ctx: &OpContext,
        route_table_id: &str,
        id: &str,
        wait: WaitDescriptor,
    ) -> ProviderResult<()> {
        let api = &*self.services.er;
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_static_route(route_table_id, id).await, |r| r.state.clone())
        })
        .await
        .map(|_| ())
    }
}

/// A route either drops traffic or forwards it to an attachment, never both
fn static_route_spec(args: &Args<'_>) -> ProviderResult<StaticRouteSpec> {
    let next_hop = args.get_string("next_hop");
    let is_blackhole = args.get_bool("is_blackhole").unwrap_or(false);
    match (&next_hop, is_blackhole) {
        (Some(_), true) => Err(ProviderError::validation(
            "next_hop: conflicts with is_blackhole = true",
        )),
        (None, false) => Err(ProviderError::validation(
            "next_hop: required unless is_blackhole = true",
        )),
        _ => Ok(StaticRouteSpec {
            destination: args.require_string("destination")?,
            attachment_id: next_hop,
            is_blackhole,
        }),
    }
}

#[async_trait]
impl ResourceHandler for StaticRouteHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_er_static_route")
            .with_description("A static route in an Enterprise Router route table")
            .attribute(
                AttributeSchema::new("route_table_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("destination", AttributeType::String)
                    .required()
                    .force_new()
                    .validate(Validator::Cidr),
            )
            .attribute(
                AttributeSchema::new("next_hop", AttributeType::String)
                    .optional()
                    .with_description("Attachment the route forwards to"),
            )
            .attribute(
                AttributeSchema::new("is_blackhole", AttributeType::Bool)
                    .optional()
                    .with_default(Value::Bool(false)),
            )
            .attribute(AttributeSchema::new("type", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
    }

    fn timeouts(&self) -> Timeouts {
        er_timeouts()
    }

    fn id_shape(&self) -> IdShape {
        IdShape::Nested
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let spec = static_route_spec(&args)?;
        let route_table_id = args.require_string("route_table_id")?;
        let route_id = ctx
            .run(self.services.er.create_static_route(&route_table_id, &spec))
            .await?;
        let id = Identifier::nested(&route_table_id, &route_id).to_string();
        let wait = self.services.polling.until(PENDING, AVAILABLE, ctx.remaining());
        keep_identifier(self.wait(ctx, &route_table_id, &route_id, wait).await, &id)?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let (route_table_id, id) = nested_parts(prior)?;
        let route = found(
            ctx.run(self.services.er.get_static_route(&route_table_id, &id))
                .await,
        )?;
        Ok(route.map(|r| {
            StateBuilder::new()
                .id("route_table_id", &route_table_id)
                .cidr("destination", &r.destination)
                .opt_string("next_hop", r.attachment_id)
                .bool("is_blackhole", r.is_blackhole)
                .string("type", r.route_type)
                .string("status", r.state)
                .string("created_at", r.created_at)
                .finish()
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        _changed: &[String],
    ) -> ProviderResult<()> {
        let (route_table_id, id) = nested_parts(prior)?;
        let spec = static_route_spec(&Args::of(desired))?;
        ctx.run(self.services.er.update_static_route(&route_table_id, &id, &spec))
            .await?;
        let wait = self.services.polling.until(PENDING, AVAILABLE, ctx.remaining());
        self.wait(ctx, &route_table_id, &id, wait).await
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let (route_table_id, id) = nested_parts(prior)?;
        ctx.run(self.services.er.delete_static_route(&route_table_id, &id))
            .await?;
        let wait = self.services.polling.until_deleted(DELETING, ctx.remaining());
        self.wait(ctx, &route_table_id, &id, wait).await
    }
}
