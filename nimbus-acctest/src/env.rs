//! Environment of acceptance runs
//!
//! Live runs are opt-in through `NIMBUS_ACC=1`; every scenario names the
//! `OS_*` variables it needs and is skipped when one of them is unset.

/// Opt-in flag for runs against the real cloud
pub const ACC_FLAG: &str = "NIMBUS_ACC";

/// Variables a scenario may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccEnv {
    Region,
    AvailabilityZone,
    ProjectId,
    ProjectName,
    VpcId,
    NetworkId,
    SubnetId,
    ImageId,
    FlavorId,
    KmsId,
    AgencyName,
    WafEnableFlag,
    ErInstanceId,
}

impl AccEnv {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Region => "OS_REGION_NAME",
            Self::AvailabilityZone => "OS_AVAILABILITY_ZONE",
            Self::ProjectId => "OS_PROJECT_ID",
            Self::ProjectName => "OS_PROJECT_NAME",
            Self::VpcId => "OS_VPC_ID",
            Self::NetworkId => "OS_NETWORK_ID",
            Self::SubnetId => "OS_SUBNET_ID",
            Self::ImageId => "OS_IMAGE_ID",
            Self::FlavorId => "OS_FLAVOR_ID",
            Self::KmsId => "OS_KMS_ID",
            Self::AgencyName => "OS_AGENCY_NAME",
            Self::WafEnableFlag => "OS_WAF_ENABLE_FLAG",
            Self::ErInstanceId => "OS_ER_INSTANCE_ID",
        }
    }

    /// Stand-in value on the simulated cloud
    pub const fn simulated(self) -> &'static str {
        match self {
            Self::Region => "eu-west-0",
            Self::AvailabilityZone => "eu-west-0a",
            Self::ProjectId => "0123456789abcdef0123456789abcdef",
            Self::ProjectName => "eu-west-0_simulated",
            Self::VpcId => "simulated-vpc",
            Self::NetworkId => "simulated-network",
            Self::SubnetId => "simulated-subnet",
            Self::ImageId => "simulated-image",
            Self::FlavorId => "s3.small.1",
            Self::KmsId => "simulated-kms-key",
            Self::AgencyName => "simulated_agency",
            Self::WafEnableFlag => "true",
            Self::ErInstanceId => "simulated-er",
        }
    }
}

/// Whether `NIMBUS_ACC` asks for a live run
pub fn acceptance_enabled(lookup: impl Fn(&str) -> Option<String>) -> bool {
    matches!(lookup(ACC_FLAG).as_deref(), Some("1") | Some("true"))
}

/// Names of the required variables that are unset or empty
pub fn missing(required: &[AccEnv], lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
    required
        .iter()
        .map(|var| var.as_str())
        .filter(|name| lookup(name).is_none_or(|v| v.is_empty()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn live_runs_are_opt_in() {
        assert!(!acceptance_enabled(lookup(&[])));
        assert!(!acceptance_enabled(lookup(&[("NIMBUS_ACC", "0")])));
        assert!(acceptance_enabled(lookup(&[("NIMBUS_ACC", "1")])));
    }

    #[test]
    fn empty_values_count_as_missing() {
        let env = lookup(&[("OS_REGION_NAME", "eu-west-0"), ("OS_VPC_ID", "")]);
        assert_eq!(
            missing(&[AccEnv::Region, AccEnv::VpcId, AccEnv::ErInstanceId], env),
            vec!["OS_VPC_ID", "OS_ER_INSTANCE_ID"]
        );
    }
}
