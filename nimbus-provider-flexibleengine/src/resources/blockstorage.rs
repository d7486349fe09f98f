//! EVS volumes

use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::kind::{ResourceHandler, keep_identifier};
use nimbus_core::provider::{ProviderError, ProviderResult};
use nimbus_core::quota::{QuotaKind, QuotaRequest};
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, Validator, types,
};
use nimbus_core::waiter::wait_for_state;

use super::{identifier, observed};
use crate::binder::{Args, StateBuilder, touches};
use crate::services::storage::{Volume, VolumeCreate};
use crate::services::{Services, found};

const VOLUME_TYPES: &[&str] = &["SATA", "SAS", "SSD", "GPSSD", "ESSD"];

pub struct VolumeHandler {
    services: Services,
}

impl VolumeHandler {
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
        let api = &*self.services.storage;
        let wait = self.services.polling.until(pending, target, ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_volume(id).await, |v: &Volume| v.status.clone())
        })
        .await
        .map(|_| ())
    }
}

fn size(args: &Args<'_>) -> ProviderResult<u64> {
    let size = args
        .get_int("size")
        .ok_or_else(|| ProviderError::validation("size: required argument is missing"))?;
    u64::try_from(size)
        .map_err(|_| ProviderError::validation(format!("size: {} is negative", size)))
}

#[async_trait]
impl ResourceHandler for VolumeHandler {
    fn schema(&self) -> ResourceSchema {
        let attachment = BlockSchema::new()
            .attribute(AttributeSchema::new("server_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("attachment_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("device", AttributeType::String).computed());

        ResourceSchema::new("flexibleengine_blockstorage_volume_v2")
            .with_description("An EVS block storage volume")
            .attribute(AttributeSchema::new("name", AttributeType::String).optional())
            .attribute(AttributeSchema::new("description", AttributeType::String).optional())
            .attribute(
                AttributeSchema::new("size", AttributeType::Int)
                    .required()
                    .validate(Validator::IntBetween(1, 32768))
                    .with_description("Size in GB; can only grow in place"),
            )
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("volume_type", AttributeType::String)
                    .optional()
                    .computed()
                    .force_new()
                    .validate(Validator::string_in(VOLUME_TYPES)),
            )
            .attribute(
                AttributeSchema::new("image_id", AttributeType::String)
                    .optional()
                    .force_new()
                    .write_only(),
            )
            .attribute(
                AttributeSchema::new("snapshot_id", AttributeType::String)
                    .optional()
                    .force_new()
                    .write_only(),
            )
            .attribute(
                AttributeSchema::new("metadata", types::string_map())
                    .optional()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("attachment", AttributeType::block(attachment)).computed(),
            )
    }

    fn import_ignore(&self) -> &'static [&'static str] {
        &["image_id", "snapshot_id"]
    }

    async fn quota_demand(
        &self,
        _ctx: &OpContext,
        desired: &Resource,
    ) -> ProviderResult<Vec<QuotaRequest>> {
        let size = size(&Args::of(desired))?;
        Ok(vec![
            QuotaRequest::new(QuotaKind::Volumes, 1),
            QuotaRequest::new(QuotaKind::VolumeGigabytes, size),
        ])
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let spec = VolumeCreate {
            name: args.get_string("name").unwrap_or_default(),
            size: size(&args)?,
            volume_type: args.get_string("volume_type"),
            availability_zone: args.get_string("availability_zone"),
            description: args.get_string("description"),
            image_id: args.get_string("image_id"),
            snapshot_id: args.get_string("snapshot_id"),
            metadata: args.get_string_map("metadata"),
        };
        let id = ctx.run(self.services.storage.create_volume(&spec)).await?;
        keep_identifier(
            self.wait_status(ctx, &id, &["creating", "downloading"], &["available"])
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
        let id = identifier(prior)?;
        let volume = found(ctx.run(self.services.storage.get_volume(id)).await)?;
        Ok(volume.map(|v| {
            let attachments = v
                .attachments
                .iter()
                .map(|a| {
                    StateBuilder::new()
                        .id("server_id", &a.server_id)
                        .id("attachment_id", &a.attachment_id)
                        .string("device", &a.device)
                })
                .collect();
            StateBuilder::new()
                .string("name", v.name)
                .opt_string("description", v.description)
                .int("size", v.size as i64)
                .string("availability_zone", v.availability_zone)
                .string("volume_type", v.volume_type)
                .string_map("metadata", &v.metadata)
                .string("status", v.status)
                .blocks("attachment", attachments)
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
        let api = &*self.services.storage;

        if touches(changed, "name") || touches(changed, "description") {
            let name = args.get_string("name").unwrap_or_default();
            let description = args.get_string("description");
            ctx.run(api.update_volume(id, &name, description.as_deref())).await?;
        }

        if touches(changed, "size") {
            let new_size = size(&args)?;
            log::info!("extending volume {} to {} GB", id, new_size);
            ctx.run(api.extend_volume(id, new_size)).await?;
            self.wait_status(ctx, id, &["extending"], &["available", "in-use"])
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        let api = &*self.services.storage;
        ctx.run(api.delete_volume(id)).await?;
        let wait = self
            .services
            .polling
            .until_deleted(&["deleting", "available"], ctx.remaining());
        wait_for_state(ctx, &wait, move || async move {
            observed(api.get_volume(id).await, |v: &Volume| v.status.clone())
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCloud, FakeLimits};
    use crate::quota::CloudUsageSource;
    use crate::resources::testing::{kind, resource, token};
    use nimbus_core::provider::ErrorKind;
    use nimbus_core::quota::QuotaBooker;
    use std::sync::Arc;

    fn volume(size: i64) -> Resource {
        resource(
            "flexibleengine_blockstorage_volume_v2",
            vec![
                ("name", Value::string("data")),
                ("size", Value::Int(size)),
                ("image_id", Value::string("img-1")),
            ],
        )
    }

    #[tokio::test]
    async fn create_extend_and_delete() {
        let cloud = Arc::new(FakeCloud::new());
        let kind = kind(VolumeHandler::new(Services::simulated(cloud.clone())));

        let state = kind.create(&token(), None, &volume(10)).await.unwrap();
        assert_eq!(state.get("status"), Some(Value::string("available")));
        assert_eq!(state.get("volume_type"), Some(Value::string("SATA")));
        assert_eq!(state.get("image_id"), Some(Value::string("img-1")));

        let grown = kind.update(&token(), &state, &volume(20)).await.unwrap();
        assert_eq!(grown.get("size"), Some(Value::Int(20)));
        assert_eq!(cloud.calls("extend_volume"), 1);

        kind.delete(&token(), &grown).await.unwrap();
        assert!(!cloud.exists(grown.identifier.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn quota_is_checked_before_the_vendor_is_called() {
        let cloud = Arc::new(FakeCloud::new().with_limits(FakeLimits {
            gigabytes: Some(15),
            ..Default::default()
        }));
        let services = Services::simulated(cloud.clone());
        let booker = QuotaBooker::new(Arc::new(CloudUsageSource::new(services.clone())));
        let kind = kind(VolumeHandler::new(services));

        let err = kind.create(&token(), Some(&booker), &volume(20)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert_eq!(cloud.calls("create_volume"), 0);

        kind.create(&token(), Some(&booker), &volume(10)).await.unwrap();
        assert_eq!(booker.reserved(QuotaKind::VolumeGigabytes).await, 0);
    }
}
