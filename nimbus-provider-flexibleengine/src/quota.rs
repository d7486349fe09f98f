//! Account usage as seen by the quota booker

use async_trait::async_trait;
use nimbus_core::provider::ProviderResult;
use nimbus_core::quota::{QuotaKind, QuotaUsage, UsageSource};

use crate::services::Services;

/// Reads usage and limits from the compute, storage, network and WAF services
pub struct CloudUsageSource {
    services: Services,
    waf_policy_limit: Option<u64>,
}

impl CloudUsageSource {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            waf_policy_limit: None,
        }
    }

    /// Dedicated WAF exposes no quota API; the limit comes from configuration
    pub fn with_waf_policy_limit(mut self, limit: Option<u64>) -> Self {
        self.waf_policy_limit = limit;
        self
    }
}

#[async_trait]
impl UsageSource for CloudUsageSource {
    async fn usage(&self, kind: QuotaKind) -> ProviderResult<QuotaUsage> {
        log::debug!("reading {:?} usage", kind);
        match kind {
            QuotaKind::Cores => Ok(self.services.compute.limits().await?.cores),
            QuotaKind::RamMb => Ok(self.services.compute.limits().await?.ram_mb),
            QuotaKind::Instances => Ok(self.services.compute.limits().await?.instances),
            QuotaKind::Volumes => Ok(self.services.storage.volume_quotas().await?.volumes),
            QuotaKind::VolumeGigabytes => {
                Ok(self.services.storage.volume_quotas().await?.gigabytes)
            }
            QuotaKind::FloatingIps => self.services.network.floating_ip_quota().await,
            QuotaKind::WafPolicies => {
                let used = self.services.waf.list_policies(None).await?.len() as u64;
                Ok(QuotaUsage::new(used, self.waf_policy_limit))
            }
            QuotaKind::CbrPolicies => Ok(QuotaUsage::new(0, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCloud, FakeLimits};
    use crate::services::waf::PolicySpec;
    use crate::services::{NetworkApi, WafApi};
    use std::sync::Arc;

    #[tokio::test]
    async fn usage_comes_from_the_services() {
        let cloud = Arc::new(FakeCloud::new().with_limits(FakeLimits {
            floating_ips: Some(3),
            ..Default::default()
        }));
        let source = CloudUsageSource::new(Services::simulated(cloud.clone()))
            .with_waf_policy_limit(Some(2));

        cloud.allocate_floating_ip("admin_external_net").await.unwrap();
        cloud
            .create_policy(&PolicySpec {
                name: "p".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            source.usage(QuotaKind::FloatingIps).await.unwrap(),
            QuotaUsage::new(1, Some(3))
        );
        assert_eq!(
            source.usage(QuotaKind::WafPolicies).await.unwrap(),
            QuotaUsage::new(1, Some(2))
        );
        assert_eq!(source.usage(QuotaKind::Cores).await.unwrap().limit, None);
    }
}
