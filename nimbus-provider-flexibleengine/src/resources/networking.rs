//! Floating IPs

use std::collections::HashMap;

use async_trait::async_trait;
use nimbus_core::context::OpContext;
use nimbus_core::kind::{ResourceHandler, keep_identifier};
use nimbus_core::provider::ProviderResult;
use nimbus_core::quota::{QuotaKind, QuotaRequest};
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator};

use super::identifier;
use crate::binder::{Args, StateBuilder, touches};
use crate::services::network::DEFAULT_POOL;
use crate::services::{Services, found};

pub struct FloatingIpHandler {
    services: Services,
}

impl FloatingIpHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ResourceHandler for FloatingIpHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("flexibleengine_networking_floatingip_v2")
            .with_description("A floating (elastic) IP address")
            .attribute(
                AttributeSchema::new("pool", AttributeType::String)
                    .optional()
                    .force_new()
                    .with_default(Value::string(DEFAULT_POOL)),
            )
            .attribute(AttributeSchema::new("address", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("port_id", AttributeType::String)
                    .optional()
                    .computed(),
            )
            .attribute(
                AttributeSchema::new("fixed_ip", AttributeType::String)
                    .optional()
                    .computed()
                    .validate(Validator::IpAddress),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
    }

    async fn quota_demand(
        &self,
        _ctx: &OpContext,
        _desired: &Resource,
    ) -> ProviderResult<Vec<QuotaRequest>> {
        Ok(vec![QuotaRequest::new(QuotaKind::FloatingIps, 1)])
    }

    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String> {
        let args = Args::of(desired);
        let pool = args.get_string("pool").unwrap_or_else(|| DEFAULT_POOL.to_string());
        let api = &*self.services.network;

        let fip = ctx.run(api.allocate_floating_ip(&pool)).await?;
        log::debug!("allocated {} from {}", fip.address, pool);
        if let Some(port_id) = args.get_string("port_id") {
            let fixed_ip = args.get_string("fixed_ip");
            keep_identifier(
                ctx.run(api.associate_floating_ip(&fip.id, Some(&port_id), fixed_ip.as_deref()))
                    .await,
                &fip.id,
            )?;
        }
        Ok(fip.id)
    }

    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = identifier(prior)?;
        let fip = found(ctx.run(self.services.network.get_floating_ip(id)).await)?;
        Ok(fip.map(|f| {
            StateBuilder::new()
                .string("pool", f.pool)
                .string("address", f.address)
                .opt_string("port_id", f.port_id)
                .opt_string("fixed_ip", f.fixed_ip)
                .string("status", f.status)
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
        if touches(changed, "port_id") || touches(changed, "fixed_ip") {
            let args = Args::of(desired);
            let port_id = args.get_string("port_id");
            let fixed_ip = args.get_string("fixed_ip").filter(|_| port_id.is_some());
            ctx.run(self.services.network.associate_floating_ip(
                id,
                port_id.as_deref(),
                fixed_ip.as_deref(),
            ))
            .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()> {
        let id = identifier(prior)?;
        ctx.run(self.services.network.release_floating_ip(id)).await
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

    #[tokio::test]
    async fn allocate_with_default_pool_and_release() {
        let cloud = Arc::new(FakeCloud::new());
        let kind = kind(FloatingIpHandler::new(Services::simulated(cloud.clone())));
        let desired = resource("flexibleengine_networking_floatingip_v2", vec![]);

        let state = kind.create(&token(), None, &desired).await.unwrap();
        assert_eq!(state.get("pool"), Some(Value::string(DEFAULT_POOL)));
        assert_eq!(state.get("status"), Some(Value::string("DOWN")));
        assert!(state.get("address").is_some());

        kind.delete(&token(), &state).await.unwrap();
        assert!(!cloud.exists(state.identifier.as_deref().unwrap()));
        // already gone counts as deleted
        kind.delete(&token(), &state).await.unwrap();
    }

    #[tokio::test]
    async fn quota_limits_allocation() {
        let cloud = Arc::new(FakeCloud::new().with_limits(FakeLimits {
            floating_ips: Some(1),
            ..Default::default()
        }));
        let services = Services::simulated(cloud.clone());
        let booker = QuotaBooker::new(Arc::new(CloudUsageSource::new(services.clone())));
        let kind = kind(FloatingIpHandler::new(services));
        let desired = resource("flexibleengine_networking_floatingip_v2", vec![]);

        kind.create(&token(), Some(&booker), &desired).await.unwrap();
        let err = kind.create(&token(), Some(&booker), &desired).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert_eq!(cloud.calls("allocate_floating_ip"), 1);
    }
}
