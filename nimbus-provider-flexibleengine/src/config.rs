//! Provider configuration
//!
//! Loaded from a JSON file or from the `OS_*` environment variables used by
//! the OpenStack tooling FlexibleEngine is compatible with.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use nimbus_core::context::TimeoutOverrides;
use serde::Deserialize;
use thiserror::Error;

/// Default cloud domain
pub const DEFAULT_CLOUD: &str = "prod-cloud-ocb.orange-business.com";

/// Default number of retries for transient HTTP failures
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("invalid timeout '{value}' for {kind}: {reason}")]
    InvalidTimeout {
        kind: String,
        value: String,
        reason: String,
    },

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Timeout overrides of one resource kind, as durations like "20m"
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    pub create: Option<String>,
    pub read: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
}

/// Settings consumed by the provider
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Identity endpoint (defaults to `https://iam.<region>.<cloud>/v3`)
    pub auth_url: Option<String>,
    pub region: String,
    /// Cloud domain the service endpoints live under
    pub cloud: Option<String>,
    pub domain_name: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// Pre-issued token; skips password authentication
    pub token: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    pub max_retries: Option<u32>,
    /// Dedicated WAF policies the account may hold; the service has no quota API
    pub waf_policy_limit: Option<u64>,
    /// Per resource kind timeout overrides
    pub timeouts: BTreeMap<String, TimeoutConfig>,
}

impl ProviderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ProviderConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `OS_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup (used with `std::env::var` or a map in tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let insecure = match get("OS_INSECURE").as_deref() {
            None | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "OS_INSECURE",
                    value: other.to_string(),
                });
            }
        };
        let max_retries = match get("OS_MAX_RETRIES") {
            Some(v) => Some(v.parse().map_err(|_| ConfigError::InvalidValue {
                name: "OS_MAX_RETRIES",
                value: v.clone(),
            })?),
            None => None,
        };

        let config = ProviderConfig {
            auth_url: get("OS_AUTH_URL"),
            region: get("OS_REGION_NAME").unwrap_or_default(),
            cloud: get("OS_CLOUD"),
            domain_name: get("OS_DOMAIN_NAME").or_else(|| get("OS_USER_DOMAIN_NAME")),
            project_id: get("OS_PROJECT_ID").or_else(|| get("OS_TENANT_ID")),
            project_name: get("OS_PROJECT_NAME").or_else(|| get("OS_TENANT_NAME")),
            user_name: get("OS_USERNAME"),
            password: get("OS_PASSWORD"),
            token: get("OS_AUTH_TOKEN"),
            insecure,
            max_retries,
            waf_policy_limit: None,
            timeouts: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that region, project and credentials are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        if self.project_id.is_none() && self.project_name.is_none() {
            return Err(ConfigError::Missing("project_id or project_name"));
        }
        if self.token.is_some() && self.project_id.is_none() {
            // a pre-issued token does not tell us the project id
            return Err(ConfigError::Missing("project_id"));
        }
        if self.token.is_none() {
            if self.user_name.is_none() || self.password.is_none() {
                return Err(ConfigError::Missing("token, or user_name and password"));
            }
            if self.domain_name.is_none() {
                return Err(ConfigError::Missing("domain_name"));
            }
        }
        for (kind, timeouts) in &self.timeouts {
            parse_overrides(kind, timeouts)?;
        }
        Ok(())
    }

    pub fn cloud(&self) -> &str {
        self.cloud.as_deref().unwrap_or(DEFAULT_CLOUD)
    }

    pub fn auth_url(&self) -> String {
        match &self.auth_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://iam.{}.{}/v3", self.region, self.cloud()),
        }
    }

    /// Base URL of a service (`https://ecs.eu-west-0.<cloud>`)
    pub fn endpoint(&self, service: &str) -> String {
        format!("https://{}.{}.{}", service, self.region, self.cloud())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Timeout overrides keyed by resource kind
    pub fn timeout_overrides(&self) -> Result<BTreeMap<String, TimeoutOverrides>, ConfigError> {
        self.timeouts
            .iter()
            .map(|(kind, t)| Ok((kind.clone(), parse_overrides(kind, t)?)))
            .collect()
    }
}

fn parse_overrides(kind: &str, config: &TimeoutConfig) -> Result<TimeoutOverrides, ConfigError> {
    let parse = |value: &Option<String>| -> Result<Option<Duration>, ConfigError> {
        match value {
            None => Ok(None),
            Some(v) => humantime::parse_duration(v)
                .map(Some)
                .map_err(|e| ConfigError::InvalidTimeout {
                    kind: kind.to_string(),
                    value: v.clone(),
                    reason: e.to_string(),
                }),
        }
    };
    Ok(TimeoutOverrides {
        create: parse(&config.create)?,
        read: parse(&config.read)?,
        update: parse(&config.update)?,
        delete: parse(&config.delete)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn from_env_with_password_credentials() {
        let config = ProviderConfig::from_lookup(env(&[
            ("OS_REGION_NAME", "eu-west-0"),
            ("OS_PROJECT_NAME", "eu-west-0_demo"),
            ("OS_DOMAIN_NAME", "OCB000123"),
            ("OS_USERNAME", "alice"),
            ("OS_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert_eq!(
            config.auth_url(),
            "https://iam.eu-west-0.prod-cloud-ocb.orange-business.com/v3"
        );
        assert_eq!(
            config.endpoint("ecs"),
            "https://ecs.eu-west-0.prod-cloud-ocb.orange-business.com"
        );
        assert_eq!(config.max_retries(), DEFAULT_MAX_RETRIES);
        assert!(!config.insecure);
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = ProviderConfig::from_lookup(env(&[
            ("OS_REGION_NAME", "eu-west-0"),
            ("OS_PROJECT_ID", "p"),
            ("OS_USERNAME", "alice"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));

        let err = ProviderConfig::from_lookup(env(&[("OS_PROJECT_ID", "p")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("region")));
    }

    #[test]
    fn invalid_flag_is_rejected() {
        let err = ProviderConfig::from_lookup(env(&[
            ("OS_REGION_NAME", "eu-west-0"),
            ("OS_PROJECT_ID", "p"),
            ("OS_AUTH_TOKEN", "t"),
            ("OS_INSECURE", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "OS_INSECURE", .. }));
    }

    #[test]
    fn load_file_with_timeout_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "region": "eu-west-0",
                "project_id": "0123",
                "token": "abc",
                "max_retries": 2,
                "timeouts": {{
                    "flexibleengine_compute_instance_v2": {{"create": "30m", "delete": "90s"}}
                }}
            }}"#
        )
        .unwrap();

        let config = ProviderConfig::load(file.path()).unwrap();
        assert_eq!(config.max_retries(), 2);
        let overrides = config.timeout_overrides().unwrap();
        let compute = &overrides["flexibleengine_compute_instance_v2"];
        assert_eq!(compute.create, Some(Duration::from_secs(1800)));
        assert_eq!(compute.delete, Some(Duration::from_secs(90)));
        assert_eq!(compute.update, None);
    }

    #[test]
    fn bad_timeout_fails_validation() {
        let config = ProviderConfig {
            region: "eu-west-0".to_string(),
            project_id: Some("p".to_string()),
            token: Some("t".to_string()),
            timeouts: BTreeMap::from([(
                "flexibleengine_vpc_v1".to_string(),
                TimeoutConfig {
                    create: Some("soon".to_string()),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { .. })
        ));
    }
}
