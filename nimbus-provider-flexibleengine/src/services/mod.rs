//! Vendor service adapters
//!
//! Each cloud service is a trait over provider-owned models. The HTTP client
//! ([`CloudClient`]) and the simulated cloud ([`crate::fake::FakeCloud`])
//! both implement every trait, so handlers never see vendor JSON.

pub mod ces;
pub mod compute;
pub mod er;
pub mod network;
pub mod storage;
pub mod vpc;
pub mod waf;

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::provider::ProviderResult;
use nimbus_core::waiter::WaitDescriptor;

use crate::client::RestClient;
use crate::fake::FakeCloud;

pub use ces::CesApi;
pub use compute::ComputeApi;
pub use er::ErApi;
pub use network::NetworkApi;
pub use storage::BlockStorageApi;
pub use vpc::VpcApi;
pub use waf::WafApi;

/// HTTP implementation of every service trait
#[derive(Clone)]
pub struct CloudClient {
    rest: Arc<RestClient>,
}

impl CloudClient {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }
}

/// Polling cadence of waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polling {
    pub delay: Duration,
    pub interval: Duration,
    pub not_found_grace: Duration,
}

impl Polling {
    /// Cadence used against the real cloud
    pub fn live() -> Self {
        Self {
            delay: Duration::from_secs(5),
            interval: Duration::from_secs(5),
            not_found_grace: Duration::from_secs(30),
        }
    }

    /// Cadence used against the simulated cloud
    pub fn fast() -> Self {
        Self {
            delay: Duration::from_millis(1),
            interval: Duration::from_millis(2),
            not_found_grace: Duration::from_millis(20),
        }
    }

    /// Wait for an object to reach one of `target`
    pub fn until(&self, pending: &[&str], target: &[&str], timeout: Duration) -> WaitDescriptor {
        WaitDescriptor::new(pending, target, timeout)
            .with_delay(self.delay)
            .with_poll_interval(self.interval)
            .with_not_found_grace(self.not_found_grace)
    }

    /// Wait for an object to disappear
    pub fn until_deleted(&self, pending: &[&str], timeout: Duration) -> WaitDescriptor {
        WaitDescriptor::for_deletion(pending, &[], timeout)
            .with_delay(self.delay)
            .with_poll_interval(self.interval)
    }
}

/// The service adapters a handler can reach
#[derive(Clone)]
pub struct Services {
    pub compute: Arc<dyn ComputeApi>,
    pub storage: Arc<dyn BlockStorageApi>,
    pub network: Arc<dyn NetworkApi>,
    pub vpc: Arc<dyn VpcApi>,
    pub waf: Arc<dyn WafApi>,
    pub ces: Arc<dyn CesApi>,
    pub er: Arc<dyn ErApi>,
    pub polling: Polling,
}

impl Services {
    pub fn http(client: CloudClient) -> Self {
        let client = Arc::new(client);
        Self {
            compute: client.clone(),
            storage: client.clone(),
            network: client.clone(),
            vpc: client.clone(),
            waf: client.clone(),
            ces: client.clone(),
            er: client,
            polling: Polling::live(),
        }
    }

    pub fn simulated(cloud: Arc<FakeCloud>) -> Self {
        Self {
            compute: cloud.clone(),
            storage: cloud.clone(),
            network: cloud.clone(),
            vpc: cloud.clone(),
            waf: cloud.clone(),
            ces: cloud.clone(),
            er: cloud,
            polling: Polling::fast(),
        }
    }
}

/// Turn a not-found error into `None`
pub fn found<T>(result: ProviderResult<T>) -> ProviderResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::provider::ProviderError;

    #[test]
    fn found_only_swallows_not_found() {
        assert_eq!(found(Ok::<_, ProviderError>(1)).unwrap(), Some(1));
        assert_eq!(
            found::<i32>(Err(ProviderError::not_found("gone"))).unwrap(),
            None
        );
        assert!(found::<i32>(Err(ProviderError::validation("bad"))).is_err());
    }

    #[test]
    fn polling_shapes_wait_descriptors() {
        let polling = Polling::fast();
        let wait = polling.until(&["BUILD"], &["ACTIVE"], Duration::from_secs(60));
        assert_eq!(wait.delay, polling.delay);
        assert!(!wait.not_found_is_target);
        let gone = polling.until_deleted(&["ACTIVE", "DELETING"], Duration::from_secs(60));
        assert!(gone.not_found_is_target);
        assert!(gone.target.is_empty());
    }
}
