//! Nimbus FlexibleEngine provider
//!
//! Resource kinds and data sources for the FlexibleEngine cloud, built on the
//! generic machinery of `nimbus-core`.
//!
//! ## Module Structure
//!
//! - `config` - Provider settings from a file or `OS_*` variables
//! - `client` - Authenticated HTTP client with retries
//! - `services` - One trait per cloud service, implemented over HTTP and in memory
//! - `fake` - In-memory cloud used by tests and the acceptance harness
//! - `binder` - Typed access to attribute maps in both directions
//! - `quota` - Account usage source for the quota booker
//! - `resources` / `data_sources` - The kinds themselves

pub mod binder;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod fake;
pub mod quota;
pub mod resources;
pub mod services;

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbus_core::context::TimeoutOverrides;
use nimbus_core::provider::ProviderError;
use nimbus_core::quota::QuotaBooker;
use nimbus_core::registry::{ProviderRegistry, RegistryError};
use thiserror::Error;

pub use config::ProviderConfig;
pub use fake::{FakeCloud, FakeLimits};
pub use services::Services;

use client::RestClient;
use quota::CloudUsageSource;
use services::CloudClient;

/// Prefix of every kind name
pub const VENDOR: &str = "flexibleengine";

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to set up the cloud client: {0}")]
    Client(#[from] ProviderError),
}

/// Register every resource kind and data source over `services`
pub fn registry(
    services: &Services,
    overrides: BTreeMap<String, TimeoutOverrides>,
    booker: Option<Arc<QuotaBooker>>,
) -> Result<ProviderRegistry, RegistryError> {
    let mut registry = ProviderRegistry::new(VENDOR).with_timeout_overrides(overrides);
    if let Some(booker) = booker {
        registry = registry.with_quota_booker(booker);
    }
    for handler in resources::all(services) {
        registry.register_resource(handler)?;
    }
    for handler in data_sources::all(services) {
        registry.register_data_source(handler)?;
    }
    log::debug!(
        "registered {} resource kinds and {} data sources",
        registry.resources().count(),
        registry.data_sources().count()
    );
    Ok(registry)
}

/// Provider talking to the real cloud
pub fn from_config(config: ProviderConfig) -> Result<ProviderRegistry, InitError> {
    config.validate()?;
    let overrides = config.timeout_overrides()?;
    let waf_policy_limit = config.waf_policy_limit;
    log::info!("configuring {} provider for region {}", VENDOR, config.region);

    let rest = Arc::new(RestClient::new(config)?);
    let services = Services::http(CloudClient::new(rest));
    let usage = CloudUsageSource::new(services.clone()).with_waf_policy_limit(waf_policy_limit);
    let booker = Arc::new(QuotaBooker::new(Arc::new(usage)));
    Ok(registry(&services, overrides, Some(booker))?)
}

/// Provider backed by an in-memory cloud, with quota booked against its limits
pub fn simulated(cloud: Arc<FakeCloud>) -> Result<ProviderRegistry, RegistryError> {
    let waf_policy_limit = cloud.limits().waf_policies;
    let services = Services::simulated(cloud);
    let usage = CloudUsageSource::new(services.clone()).with_waf_policy_limit(waf_policy_limit);
    let booker = Arc::new(QuotaBooker::new(Arc::new(usage)));
    registry(&services, BTreeMap::new(), Some(booker))
}
