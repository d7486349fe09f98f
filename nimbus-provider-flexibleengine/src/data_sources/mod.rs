//! Data sources: read-only lookups of existing vendor objects

mod compute;
mod waf;

use std::sync::Arc;

use nimbus_core::kind::DataSourceHandler;

use crate::services::Services;

/// Every data source the provider ships
pub fn all(services: &Services) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(compute::InstanceLookup::new(services.clone())),
        Arc::new(compute::InstanceListing::new(services.clone())),
        Arc::new(waf::PolicyListing::new(services.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::registry::ProviderRegistry;

    use crate::fake::FakeCloud;

    #[test]
    fn every_data_source_registers() {
        let services = Services::simulated(Arc::new(FakeCloud::new()));
        let mut registry = ProviderRegistry::new("flexibleengine");
        for handler in all(&services) {
            registry.register_data_source(handler).unwrap();
        }
        assert_eq!(registry.data_sources().count(), 3);
    }
}
