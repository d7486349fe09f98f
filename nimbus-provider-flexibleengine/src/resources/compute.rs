//! ECS resources: instances, key pairs, volume attachments and floating IP
//! associations

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::context::{OpContext, Timeouts};
use nimbus_core::identifier::{IdShape, Identifier};
use nimbus_core::kind::{ResourceHandler, keep_identifier};
use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::quota::QuotaRequest;
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, Validator, types,
};
use nimbus_core::waiter::wait_for_state;

use super::{identifier, nested_parts, observed, parse_identifier};
use crate::binder::{Args, StateBuilder, tags_diff, touches};
use crate::services::compute::{NetworkAttachment, Server, ServerCreate, is_vendor_metadata};
use crate::services::{Services, found};

// =============================================================================
// flexibleengine_compute_instance_v2
// =============================================================================

const SERVER_GONE: &[&str] = &["DELETED", "SOFT_DELETED"];

pub struct InstanceHandler {
    services: Services,
}

impl InstanceHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn wait_status(
        &self,
        ctx: &OpContext,
        id: &str,
        pending: &[&str],
        target: &[&str],
    ) -> ProviderResult<()> {
        let api = &*self.services.compute;
        let wait = self.services.polling.until(pending, target, ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_server(id).await, |s: &Server| s.status.clone())
        })
        .await
        .map(|_| ())
    }
}

pub(crate) fn server_state(server: &Server) -> HashMap<String, Value> {
    let user_metadata: BTreeMap<String, String> = server
        .metadata
        .iter()
        .filter(|(key, _)| !is_vendor_metadata(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let networks = server
        .networks
        .iter()
        .map(|n| {
            StateBuilder::new()
                .id("uuid", &n.uuid)
                .string("fixed_ip_v4", &n.fixed_ip_v4)
                .string("mac", &n.mac)
                .id("port", &n.port)
        })
        .collect();
    StateBuilder::new()
        .string("name", &server.name)
        .string("flavor_id", &server.flavor_id)
        .string("image_id", &server.image_id)
        .string("availability_zone", &server.availability_zone)
        .string("key_pair", &server.key_pair)
        .string_set("security_groups", server.security_groups.iter().cloned())
        .blocks("network", networks)
        .string_map("metadata", &user_metadata)
        .string_map("all_metadata", &server.metadata)
        .string_map("tags", &server.tags)
        .string("status", &server.status)
        .opt_string(
            "access_ip_v4",
            server.networks.first().map(|n| n.fixed_ip_v4.clone()),
        )
        .opt_string("floating_ip", server.floating_ips.first().cloned())
        .finish()
}

#[async_trait]
impl ResourceHandler for InstanceHandler {
    fn schema(&self) -> ResourceSchema {
        let network = BlockSchema::new()
            .attribute(AttributeSchema::new("uuid", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("fixed_ip_v4", AttributeType::String)
                    .optional()
                    .computed()
                    .validate(Validator::IpAddress),
            )
            .attribute(AttributeSchema::new("mac", AttributeType::String).computed())
            .attribute(AttributeSchema::new("port", AttributeType::String).computed())
            .min_items(1);

        ResourceSchema::new("flexibleengine_compute_instance_v2")
            .with_description("An elastic cloud server")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .validate(Validator::StringLenBetween(1, 64)),
            )
            .attribute(
                AttributeSchema::new("flavor_id", AttributeType::String)
                    .required()
                    .with_description("Changing the flavor resizes the server"),
            )
            .attribute(
                AttributeSchema::new("image_id", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("key_pair", AttributeType::String)
                    .optional()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("security_groups", types::string_set())
                    .optional()
                    .computed(),
            )
            .attribute(
                AttributeSchema::new("network", AttributeType::block(network))
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("metadata", types::string_map()).optional())
            .attribute(
                AttributeSchema::new("all_metadata", types::string_map())
                    .computed()
                    .with_description("Every metadata item, including the ones set by the cloud"),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()).optional())
            .attribute(
                AttributeSchema::new("user_data", AttributeType::String)
                    .optional()
                    .force_new()
                    .write_only(),
            )
            .attribute(
                AttributeSchema::new("admin_pass", AttributeType::String)
                    .optional()
                    .force_new()
                    .sensitive(),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("access_ip_v4", AttributeType::String).computed())
            .attribute(AttributeSchema::new("floating_ip", AttributeType::String).computed())
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
            .with_create(Duration::from_secs(30 * 60))
            .with_update(Duration::from_secs(30 * 60))
            .with_delete(Duration::from_secs(30 * 60))
    }

    fn import_ignore(&self) -> &'static [&'static str] {
        &["admin_pass", "user_data"]
    }

    async fn quota_demand(
        &self,
        ctx: &OpContext,
        desired: &Resource,
    ) -> ProviderResult<Vec<QuotaRequest>> {
        let flavor_id = Args::of(desired).require_string("flavor_id")?;
        let flavor = ctx.run(self.services.compute.get_flavor(&flavor_id)).await?;
        Ok(QuotaRequest::for_flavor(flavor.vcpus, flavor.ram))
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let networks = args
            .get_blocks("network")
            .into_iter()
            .map(|n| {
                Ok(NetworkAttachment {
                    uuid: n.require_string("uuid")?,
                    fixed_ip_v4: n.get_string("fixed_ip_v4"),
                })
            })
            .collect::<ProviderResult<Vec<_>>>()?;
        let spec = ServerCreate {
            name: args.require_string("name")?,
            image_id: args.get_string("image_id"),
            flavor_id: args.require_string("flavor_id")?,
            key_pair: args.get_string("key_pair"),
            security_groups: args.get_string_set("security_groups"),
            networks,
            availability_zone: args.get_string("availability_zone"),
            metadata: args.get_string_map("metadata"),
            tags: args.get_string_map("tags"),
            user_data: args.get_string("user_data"),
            admin_pass: args.get_string("admin_pass"),
        };

        let id = ctx.run(self.services.compute.create_server(&spec)).await?;
        log::debug!("server {} requested, waiting for ACTIVE", id);
        keep_identifier(self.wait_status(ctx, &id, &["BUILD"], &["ACTIVE"]).await, &id)?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let Some(server) = found(ctx.run(self.services.compute.get_server(id)).await)? else {
            return Ok(None);
        };
        if SERVER_GONE.contains(&server.status.as_str()) {
            return Ok(None);
        }
        Ok(Some(server_state(&server)))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
        changed: &[String],
    ) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let api = &*self.services.compute;
        let args = Args::of(desired);
        let before = Args::new(&prior.attributes);

        if touches(changed, "name") {
            ctx.run(api.rename_server(id, &args.require_string("name")?)).await?;
        }

        if touches(changed, "metadata") {
            let (set, remove) = tags_diff(
                &before.get_string_map("metadata"),
                &args.get_string_map("metadata"),
            );
            if !set.is_empty() {
                ctx.run(api.set_metadata(id, &set)).await?;
            }
            for key in &remove {
                found(ctx.run(api.delete_metadata(id, key)).await)?;
            }
        }

        if touches(changed, "tags") {
            let (set, remove) =
                tags_diff(&before.get_string_map("tags"), &args.get_string_map("tags"));
            if !set.is_empty() {
                ctx.run(api.add_server_tags(id, &set)).await?;
            }
            if !remove.is_empty() {
                ctx.run(api.remove_server_tags(id, &remove)).await?;
            }
        }

        if touches(changed, "security_groups") {
            let old = before.get_string_set("security_groups");
            let new = args.get_string_set("security_groups");
            for group in new.iter().filter(|g| !old.contains(g)) {
                ctx.run(api.add_security_group(id, group)).await?;
            }
            for group in old.iter().filter(|g| !new.contains(g)) {
                found(ctx.run(api.remove_security_group(id, group)).await)?;
            }
        }

        if touches(changed, "flavor_id") {
            let flavor_id = args.require_string("flavor_id")?;
            log::info!("resizing server {} to {}", id, flavor_id);
            ctx.run(api.resize_server(id, &flavor_id)).await?;
            self.wait_status(ctx, id, &["RESIZE"], &["VERIFY_RESIZE"]).await?;
            ctx.run(api.confirm_resize(id)).await?;
            self.wait_status(ctx, id, &["VERIFY_RESIZE"], &["ACTIVE"]).await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let api = &*self.services.compute;
        ctx.run(api.delete_server(id)).await?;

        let wait = self
            .services
            .polling
            .until_deleted(&["ACTIVE", "SHUTOFF", "ERROR", "BUILD"], ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            let server = found(api.get_server(id).await)?;
            Ok(server
                .filter(|s| !SERVER_GONE.contains(&s.status.as_str()))
                .map(|s| {
                    let status = s.status.clone();
                    (s, status)
                }))
        })
        .await
        .map(|_| ())
    }
}

// =============================================================================
// flexibleengine_compute_keypair_v2
// =============================================================================

/// Key pairs are addressed by name
pub struct KeypairHandler {
    services: Services,
}

impl KeypairHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ResourceHandler for KeypairHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_compute_keypair_v2")
            .with_description("An SSH key pair")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new()
                    .validate(Validator::StringLenBetween(1, 64)),
            )
            .attribute(
                AttributeSchema::new("public_key", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("fingerprint", AttributeType::String).computed())
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let name = args.require_string("name")?;
        let public_key = args.require_string("public_key")?;
        let keypair = ctx
            .run(self.services.compute.create_keypair(&name, Some(&public_key)))
            .await?;
        Ok(keypair.name)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let name = identifier(prior)?;
        let keypair = found(ctx.run(self.services.compute.get_keypair(name)).await)?;
        Ok(keypair.map(|k| {
            StateBuilder::new()
                .string("name", k.name)
                .string("public_key", k.public_key.trim())
                .string("fingerprint", k.fingerprint)
                .finish()
        }))
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let name = identifier(prior)?;
        ctx.run(self.services.compute.delete_keypair(name)).await
    }
}

// =============================================================================
// flexibleengine_compute_volume_attach_v2
// =============================================================================

/// Identified by `<instance_id>/<attachment_id>`
pub struct VolumeAttachHandler {
    services: Services,
}

impl VolumeAttachHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn wait_volume(
        &self,
        ctx: &OpContext,
        volume_id: &str,
        pending: &[&str],
        target: &[&str],
    ) -> ProviderResult<()> {
        let api = &*self.services.storage;
        let wait = self.services.polling.until(pending, target, ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_volume(volume_id).await, |v| v.status.clone())
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ResourceHandler for VolumeAttachHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_compute_volume_attach_v2")
            .with_description("Attaches a block storage volume to an instance")
            .attribute(
                AttributeSchema::new("instance_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("volume_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("device", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new(),
            )
    }

    fn id_shape(&self) -> IdShape {
        IdShape::Nested
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let instance_id = args.require_string("instance_id")?;
        let volume_id = args.require_string("volume_id")?;
        let device = args.get_string("device");

        let attachment = ctx
            .run(
                self.services
                    .compute
                    .attach_volume(&instance_id, &volume_id, device.as_deref()),
            )
            .await?;
        let id = Identifier::nested(&instance_id, &attachment.id).to_string();
        keep_identifier(
            self.wait_volume(ctx, &volume_id, &["available", "attaching"], &["in-use"])
                .await,
            &id,
        )?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let (instance_id, attachment_id) = nested_parts(prior)?;
        let attachment = found(
            ctx.run(
                self.services
                    .compute
                    .get_volume_attachment(&instance_id, &attachment_id),
            )
            .await,
        )?;
        Ok(attachment.map(|a| {
            StateBuilder::new()
                .id("instance_id", &a.server_id)
                .id("volume_id", &a.volume_id)
                .string("device", a.device)
                .finish()
        }))
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let (instance_id, attachment_id) = nested_parts(prior)?;
        let api = &*self.services.compute;
        let attachment = ctx
            .run(api.get_volume_attachment(&instance_id, &attachment_id))
            .await?;
        ctx.run(api.detach_volume(&instance_id, &attachment_id)).await?;
        self.wait_volume(
            ctx,
            &attachment.volume_id,
            &["in-use", "detaching"],
            &["available"],
        )
        .await
    }
}

// =============================================================================
// flexibleengine_compute_floatingip_associate_v2
// =============================================================================

const ASSOCIATED: &str = "ASSOCIATED";
const ASSOCIATING: &str = "ASSOCIATING";

/// Identified by `<floating_ip>/<instance_id>/<fixed_ip>`
pub struct FloatingIpAssociateHandler {
    services: Services,
}

impl FloatingIpAssociateHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ResourceHandler for FloatingIpAssociateHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_compute_floatingip_associate_v2")
            .with_description("Binds a floating IP to a port of an instance")
            .attribute(
                AttributeSchema::new("floating_ip", AttributeType::String)
                    .required()
                    .force_new()
                    .validate(Validator::IpAddress),
            )
            .attribute(
                AttributeSchema::new("instance_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("fixed_ip", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new()
                    .validate(Validator::IpAddress),
            )
    }

    fn id_shape(&self) -> IdShape {
        IdShape::Typed
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let address = args.require_string("floating_ip")?;
        let instance_id = args.require_string("instance_id")?;
        let fixed_ip = args.get_string("fixed_ip");
        let network = &*self.services.network;

        let fip = ctx.run(network.find_floating_ip(&address)).await?;
        let ports = ctx.run(network.list_ports(&instance_id)).await?;
        let (port, ip) = ports
            .iter()
            .find_map(|port| match &fixed_ip {
                Some(ip) => port.fixed_ips.iter().find(|p| *p == ip).map(|ip| (port, ip.clone())),
                None => port.fixed_ips.first().map(|ip| (port, ip.clone())),
            })
            .ok_or_else(|| {
                ProviderError::validation(format!(
                    "instance {} has no port{}",
                    instance_id,
                    fixed_ip
                        .as_deref()
                        .map(|ip| format!(" with fixed IP {}", ip))
                        .unwrap_or_default()
                ))
            })?;

        ctx.run(network.associate_floating_ip(&fip.id, Some(&port.id), Some(&ip)))
            .await?;
        let id = Identifier::typed(&address, &instance_id, &ip).to_string();

        let compute = &*self.services.compute;
        let server_id = instance_id.as_str();
        let wanted = address.as_str();
        let wait = self
            .services
            .polling
            .until(&[ASSOCIATING], &[ASSOCIATED], ctx.remaining());
        let waited = wait_for_state(ctx, &wait, move || async move {
            observed(compute.get_server(server_id).await, |s: &Server| {
                if s.floating_ips.iter().any(|f| f == wanted) {
                    ASSOCIATED.to_string()
                } else {
                    ASSOCIATING.to_string()
                }
            })
        })
        .await;
        keep_identifier(waited, &id)?;
        Ok(id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = parse_identifier(prior, IdShape::Typed)?;
        let address = id.parent().unwrap_or_default();
        let instance_id = id.tag().unwrap_or_default();
        let network = &*self.services.network;

        let Some(fip) = found(ctx.run(network.find_floating_ip(address)).await)? else {
            return Ok(None);
        };
        let Some(port_id) = fip.port_id.as_deref() else {
            return Ok(None);
        };
        let ports = ctx.run(network.list_ports(instance_id)).await?;
        if !ports.iter().any(|p| p.id == port_id) {
            log::debug!("{} is bound to a port outside instance {}", address, instance_id);
            return Ok(None);
        }
        Ok(Some(
            StateBuilder::new()
                .string("floating_ip", fip.address)
                .id("instance_id", instance_id)
                .opt_string("fixed_ip", fip.fixed_ip)
                .finish(),
        ))
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = parse_identifier(prior, IdShape::Typed)?;
        let address = id.parent().unwrap_or_default();
        let instance_id = id.tag().unwrap_or_default();
        let network = &*self.services.network;

        let fip = ctx.run(network.find_floating_ip(address)).await?;
        let Some(port_id) = fip.port_id.as_deref() else {
            return Ok(());
        };
        let ports = ctx.run(network.list_ports(instance_id)).await?;
        if ports.iter().any(|p| p.id == port_id) {
            ctx.run(network.associate_floating_ip(&fip.id, None, None)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing::{block, cloud, kind, resource, strings, token};
    use crate::services::{BlockStorageApi, NetworkApi};
    use crate::services::storage::VolumeCreate;
    use nimbus_core::provider::ErrorKind;
    use nimbus_core::resource::ResourceId;

    fn instance(name: &str, flavor: &str) -> Resource {
        resource(
            "flexibleengine_compute_instance_v2",
            vec![
                ("name", Value::string(name)),
                ("flavor_id", Value::string(flavor)),
                ("image_id", Value::string("img-1")),
                ("network", Value::List(vec![block(vec![("uuid", Value::string("net-1"))])])),
                ("metadata", block(vec![("foo", Value::string("bar"))])),
                ("admin_pass", Value::string("s3cret")),
            ],
        )
    }

    #[tokio::test]
    async fn instance_create_waits_for_active_and_reads_back() {
        let (cloud, services) = cloud();
        let kind = kind(InstanceHandler::new(services));

        let state = kind
            .create(&token(), None, &instance("web", "s3.small.1"))
            .await
            .unwrap();

        assert!(cloud.calls("get_server") >= 2);
        assert_eq!(state.get("status"), Some(Value::string("ACTIVE")));
        assert_eq!(state.get("security_groups"), Some(strings(&["default"])));
        assert!(state.get("network.0.fixed_ip_v4").is_some());
        assert_eq!(state.get("admin_pass"), Some(Value::string("s3cret")));
        assert!(state.get("access_ip_v4").is_some());
    }

    #[tokio::test]
    async fn failed_build_keeps_identifier() {
        let (cloud, services) = cloud();
        cloud.fail_builds_named("broken");
        let kind = kind(InstanceHandler::new(services));

        let err = kind
            .create(&token(), None, &instance("broken", "s3.small.1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedState);
        assert!(err.identifier.is_some());
    }

    #[tokio::test]
    async fn instance_update_resizes_and_syncs_metadata() {
        let (cloud, services) = cloud();
        let kind = kind(InstanceHandler::new(services));
        let state = kind
            .create(&token(), None, &instance("web", "s3.small.1"))
            .await
            .unwrap();

        let desired = instance("web-renamed", "s3.medium.2")
            .with_attribute("metadata", block(vec![("muh", Value::string("kuh"))]));
        let updated = kind.update(&token(), &state, &desired).await.unwrap();

        assert_eq!(updated.get("flavor_id"), Some(Value::string("s3.medium.2")));
        assert_eq!(updated.get("name"), Some(Value::string("web-renamed")));
        assert_eq!(updated.get("metadata.muh"), Some(Value::string("kuh")));
        assert_eq!(updated.get("metadata.foo"), None);
        assert_eq!(cloud.calls("confirm_resize"), 1);
    }

    #[tokio::test]
    async fn instance_tags_change_by_key() {
        let (cloud, services) = cloud();
        let kind = kind(InstanceHandler::new(services));
        let tagged = |tags: Vec<(&str, Value)>| {
            instance("web", "s3.small.1").with_attribute("tags", block(tags))
        };
        let state = kind
            .create(
                &token(),
                None,
                &tagged(vec![
                    ("muh", Value::string("value-create")),
                    ("kuh", Value::string("value-create")),
                ]),
            )
            .await
            .unwrap();
        assert!(matches!(state.get("tags"), Some(Value::Map(tags)) if tags.len() == 2));
        assert_eq!(state.get("all_metadata.foo"), Some(Value::string("bar")));
        assert_eq!(state.get("all_metadata.os_type"), Some(Value::string("Linux")));
        assert_eq!(state.get("metadata.os_type"), None);

        let updated = kind
            .update(&token(), &state, &tagged(vec![("muh", Value::string("value-update"))]))
            .await
            .unwrap();
        assert_eq!(updated.get("tags.muh"), Some(Value::string("value-update")));
        assert_eq!(updated.get("tags.kuh"), None);
        assert_eq!(cloud.calls("add_server_tags"), 1);
        assert_eq!(cloud.calls("remove_server_tags"), 1);
    }

    #[tokio::test]
    async fn instance_delete_waits_until_gone() {
        let (cloud, services) = cloud();
        let kind = kind(InstanceHandler::new(services));
        let state = kind
            .create(&token(), None, &instance("web", "s3.small.1"))
            .await
            .unwrap();
        let id = state.identifier.clone().unwrap();

        kind.delete(&token(), &state).await.unwrap();
        assert!(!cloud.exists(&id));
    }

    #[tokio::test]
    async fn keypair_round_trip_and_import() {
        let (_cloud, services) = cloud();
        let kind = kind(KeypairHandler::new(services));
        let desired = resource(
            "flexibleengine_compute_keypair_v2",
            vec![
                ("name", Value::string("deployer")),
                ("public_key", Value::string("ssh-rsa AAAAB3Nza deployer\n")),
            ],
        );

        let state = kind.create(&token(), None, &desired).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some("deployer"));
        assert!(state.get("fingerprint").is_some());

        let rid = ResourceId::new("flexibleengine_compute_keypair_v2", "k");
        let imported = kind
            .import(&token(), &rid, "deployer")
            .await
            .unwrap();
        assert_eq!(imported.get("public_key"), state.get("public_key"));
    }

    #[tokio::test]
    async fn volume_attach_and_detach() {
        let (cloud, services) = cloud();
        let server = kind(InstanceHandler::new(services.clone()))
            .create(&token(), None, &instance("db", "s3.small.1"))
            .await
            .unwrap();
        let volume_id = cloud
            .create_volume(&VolumeCreate {
                name: "data".to_string(),
                size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        for _ in 0..3 {
            cloud.get_volume(&volume_id).await.unwrap();
        }

        let kind = kind(VolumeAttachHandler::new(services));
        let desired = resource(
            "flexibleengine_compute_volume_attach_v2",
            vec![
                ("instance_id", Value::string(server.identifier.clone().unwrap())),
                ("volume_id", Value::string(volume_id.clone())),
            ],
        );
        let state = kind.create(&token(), None, &desired).await.unwrap();
        assert_eq!(state.get("device"), Some(Value::string("/dev/vdb")));
        assert_eq!(cloud.get_volume(&volume_id).await.unwrap().status, "in-use");

        kind.delete(&token(), &state).await.unwrap();
        assert_eq!(cloud.get_volume(&volume_id).await.unwrap().status, "available");
    }

    #[tokio::test]
    async fn floating_ip_association_follows_the_port() {
        let (cloud, services) = cloud();
        let server = kind(InstanceHandler::new(services.clone()))
            .create(&token(), None, &instance("web", "s3.small.1"))
            .await
            .unwrap();
        let fip = cloud.allocate_floating_ip("admin_external_net").await.unwrap();

        let kind = kind(FloatingIpAssociateHandler::new(services));
        let desired = resource(
            "flexibleengine_compute_floatingip_associate_v2",
            vec![
                ("floating_ip", Value::string(fip.address.clone())),
                ("instance_id", Value::string(server.identifier.clone().unwrap())),
            ],
        );
        let state = kind.create(&token(), None, &desired).await.unwrap();
        let id = state.identifier.clone().unwrap();
        assert!(id.starts_with(&format!("{}/", fip.address)));
        assert_eq!(state.get("fixed_ip"), server.get("network.0.fixed_ip_v4"));

        let imported = kind
            .import(&token(), &state.id, &id)
            .await
            .unwrap();
        assert_eq!(imported.attributes, state.attributes);

        cloud.associate_floating_ip(&fip.id, None, None).await.unwrap();
        assert!(!kind.read(&token(), &state).await.unwrap().exists);
    }
}
