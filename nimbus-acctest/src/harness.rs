//! Runs scenarios against the live or the simulated cloud

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use nimbus_core::interpreter::{ApplyResult, EffectOutcome, Interpreter, StateMap};
use nimbus_core::provider::{Provider, ProviderError};
use nimbus_core::quota::QuotaBooker;
use nimbus_core::registry::ProviderRegistry;
use nimbus_core::resource::State;
use nimbus_provider_flexibleengine::client::RestClient;
use nimbus_provider_flexibleengine::quota::CloudUsageSource;
use nimbus_provider_flexibleengine::services::CloudClient;
use nimbus_provider_flexibleengine::{FakeCloud, InitError, ProviderConfig, Services};
use regex::Regex;
use thiserror::Error;

use crate::case::{ImportStep, TestCase, TestStep};
use crate::env::{self, AccEnv};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{case}: {stage}: {source}")]
    Provider {
        case: String,
        stage: String,
        source: ProviderError,
    },

    #[error("{case}: {stage}: {message}")]
    Failed {
        case: String,
        stage: String,
        message: String,
    },
}

impl HarnessError {
    /// The provider error behind a failure, if there was one
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            HarnessError::Provider { source, .. } => Some(source),
            HarnessError::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// Pre-check failed; the reason names what was missing
    Skipped(String),
}

/// Scenario runner bound to one cloud
///
/// Creates inside a scenario do not book quota themselves; scenarios book
/// their whole demand up front on the harness booker, which every scenario
/// run by this harness shares.
pub struct Harness {
    registry: Arc<ProviderRegistry>,
    booker: Arc<QuotaBooker>,
    cloud: Option<Arc<FakeCloud>>,
}

impl Harness {
    /// Harness over a fresh simulated cloud
    pub fn simulated() -> Result<Self, InitError> {
        Self::on(Arc::new(FakeCloud::new()))
    }

    /// Harness over the given simulated cloud
    pub fn on(cloud: Arc<FakeCloud>) -> Result<Self, InitError> {
        let waf_policy_limit = cloud.limits().waf_policies;
        let services = Services::simulated(cloud.clone());
        let usage = CloudUsageSource::new(services.clone()).with_waf_policy_limit(waf_policy_limit);
        let registry = nimbus_provider_flexibleengine::registry(&services, BTreeMap::new(), None)?;
        Ok(Self {
            registry: Arc::new(registry),
            booker: Arc::new(QuotaBooker::new(Arc::new(usage))),
            cloud: Some(cloud),
        })
    }

    /// Harness over the real cloud
    pub fn live(config: ProviderConfig) -> Result<Self, InitError> {
        config.validate()?;
        let overrides = config.timeout_overrides()?;
        let waf_policy_limit = config.waf_policy_limit;
        let rest = RestClient::new(config)?;
        let services = Services::http(CloudClient::new(Arc::new(rest)));
        let usage = CloudUsageSource::new(services.clone()).with_waf_policy_limit(waf_policy_limit);
        let registry = nimbus_provider_flexibleengine::registry(&services, overrides, None)?;
        Ok(Self {
            registry: Arc::new(registry),
            booker: Arc::new(QuotaBooker::new(Arc::new(usage))),
            cloud: None,
        })
    }

    /// Live when `NIMBUS_ACC=1`, simulated otherwise
    pub fn from_env() -> Result<Self, InitError> {
        if env::acceptance_enabled(|name| std::env::var(name).ok()) {
            log::info!("{} is set, running against the real cloud", env::ACC_FLAG);
            Self::live(ProviderConfig::from_env()?)
        } else {
            Self::simulated()
        }
    }

    pub fn is_live(&self) -> bool {
        self.cloud.is_none()
    }

    /// The simulated cloud, when not live
    pub fn cloud(&self) -> Option<&Arc<FakeCloud>> {
        self.cloud.as_ref()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn booker(&self) -> &Arc<QuotaBooker> {
        &self.booker
    }

    /// Value of an environment variable, or its stand-in on the simulated cloud
    pub fn env(&self, var: AccEnv) -> String {
        if self.is_live() {
            std::env::var(var.as_str()).unwrap_or_default()
        } else {
            var.simulated().to_string()
        }
    }

    fn precheck(&self, case: &TestCase) -> Option<String> {
        if !self.is_live() {
            return None;
        }
        let missing = env::missing(&case.required_env, |name| std::env::var(name).ok());
        if missing.is_empty() {
            None
        } else {
            Some(format!("{} must be set", missing.join(", ")))
        }
    }

    /// Run one scenario: pre-check, quota, steps, imports, destroy and
    /// destroy verification
    pub async fn run(&self, case: &TestCase) -> Result<Outcome, HarnessError> {
        if let Some(reason) = self.precheck(case) {
            log::warn!("skipping {}: {}", case.name, reason);
            return Ok(Outcome::Skipped(reason));
        }
        log::info!("running {}", case.name);

        let reservation = if case.quota.is_empty() {
            None
        } else {
            let token = self
                .booker
                .book(&case.quota)
                .await
                .map_err(|e| provider_error(case, "quota", e))?;
            Some(token)
        };

        let interpreter = Interpreter::new(self.registry.clone());
        let mut states = StateMap::new();
        let result = self.run_steps(case, &interpreter, &mut states).await;
        let destroyed = self.destroy(case, &interpreter, &mut states).await;

        if let Some(token) = reservation {
            self.booker.release(token).await;
        }
        result?;
        destroyed?;
        Ok(Outcome::Passed)
    }

    /// Run scenarios concurrently; all of them book on the same booker
    pub async fn run_parallel(&self, cases: &[TestCase]) -> Vec<Result<Outcome, HarnessError>> {
        join_all(cases.iter().map(|case| self.run(case))).await
    }

    async fn run_steps(
        &self,
        case: &TestCase,
        interpreter: &Interpreter<Arc<ProviderRegistry>>,
        states: &mut StateMap,
    ) -> Result<(), HarnessError> {
        for (index, step) in case.steps.iter().enumerate() {
            let stage = format!("step {}", index + 1);
            self.run_step(case, &stage, step, interpreter, states).await?;
        }
        for import in &case.imports {
            self.verify_import(case, import, interpreter, states).await?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        case: &TestCase,
        stage: &str,
        step: &TestStep,
        interpreter: &Interpreter<Arc<ProviderRegistry>>,
        states: &mut StateMap,
    ) -> Result<(), HarnessError> {
        if let Some(hook) = &step.pre_config {
            hook(states);
        }
        *states = interpreter
            .refresh(states)
            .await
            .map_err(|e| provider_error(case, stage, e))?;

        let applied = match interpreter.plan(&step.document, states).await {
            Ok(plan) => {
                log::debug!("{} {} plan:\n{}", case.name, stage, plan);
                let result = interpreter.apply(&plan, states).await;
                let data = data_states(&result);
                first_error(result).map_or(Ok(data), Err)
            }
            Err(e) => Err(e),
        };

        let data = match (applied, &step.expect_error) {
            (Err(e), Some(pattern)) => {
                let re = Regex::new(pattern).map_err(|err| failure(case, stage, err.to_string()))?;
                return if re.is_match(&e.to_string()) {
                    Ok(())
                } else {
                    Err(failure(
                        case,
                        stage,
                        format!("expected an error matching /{}/, got: {}", pattern, e),
                    ))
                };
            }
            (Ok(_), Some(pattern)) => {
                return Err(failure(
                    case,
                    stage,
                    format!("expected an error matching /{}/, but the step succeeded", pattern),
                ));
            }
            (Err(e), None) => return Err(provider_error(case, stage, e)),
            (Ok(data), None) => data,
        };

        *states = interpreter
            .refresh(states)
            .await
            .map_err(|e| provider_error(case, stage, e))?;
        let mut known: HashMap<String, State> = states
            .values()
            .filter(|s| s.exists)
            .map(|s| (s.id.address(), s.clone()))
            .collect();
        known.extend(data);
        for check in &step.checks {
            check
                .verify(&*self.registry, &known)
                .await
                .map_err(|message| failure(case, stage, message))?;
        }

        let follow_up = interpreter
            .plan(&step.document, states)
            .await
            .map_err(|e| provider_error(case, stage, e))?;
        let pending = follow_up.mutation_count();
        if step.expect_non_empty_plan && pending == 0 {
            return Err(failure(case, stage, "expected a non-empty plan after apply".to_string()));
        }
        if !step.expect_non_empty_plan && pending > 0 {
            return Err(failure(
                case,
                stage,
                format!("after applying, the plan was not empty:\n{}", follow_up),
            ));
        }
        Ok(())
    }

    async fn verify_import(
        &self,
        case: &TestCase,
        import: &ImportStep,
        interpreter: &Interpreter<Arc<ProviderRegistry>>,
        states: &StateMap,
    ) -> Result<(), HarnessError> {
        let stage = format!("import {}", import.address);
        let applied = states
            .values()
            .find(|s| s.id.address() == import.address)
            .ok_or_else(|| failure(case, &stage, "not in state".to_string()))?;
        let import_id = match &import.import_id {
            Some(id) => id(applied),
            None => applied.identifier.clone(),
        }
        .ok_or_else(|| failure(case, &stage, "no import identifier".to_string()))?;

        let mut scratch = StateMap::new();
        let imported = interpreter
            .import(&applied.id, &import_id, &mut scratch)
            .await
            .map_err(|e| provider_error(case, &stage, e))?;

        let mut ignore = import.ignore.clone();
        if let Some(kind) = self.registry.resource(&applied.id.resource_type) {
            ignore.extend(kind.import_ignore().iter().map(|a| a.to_string()));
        }
        let expected = comparable(applied, &ignore);
        let actual = comparable(&imported, &ignore);
        if expected != actual {
            let mut keys: Vec<&String> = expected.keys().chain(actual.keys()).collect();
            keys.sort();
            keys.dedup();
            let diffs: Vec<String> = keys
                .into_iter()
                .filter(|k| expected.get(*k) != actual.get(*k))
                .map(|k| format!("  {}: {:?} => {:?}", k, expected.get(k), actual.get(k)))
                .collect();
            return Err(failure(
                case,
                &stage,
                format!("imported state differs:\n{}", diffs.join("\n")),
            ));
        }
        Ok(())
    }

    async fn destroy(
        &self,
        case: &TestCase,
        interpreter: &Interpreter<Arc<ProviderRegistry>>,
        states: &mut StateMap,
    ) -> Result<(), HarnessError> {
        let applied: Vec<State> = states.values().cloned().collect();
        let result = interpreter.destroy(case.last_document(), states).await;
        if let Some(e) = first_error(result) {
            return Err(provider_error(case, "destroy", e));
        }

        for prior in applied.iter().filter(|s| s.identifier.is_some()) {
            let current = self
                .registry
                .read(prior)
                .await
                .map_err(|e| provider_error(case, "check destroy", e))?;
            if current.exists {
                return Err(failure(
                    case,
                    "check destroy",
                    format!("{} still exists", prior.id),
                ));
            }
        }
        Ok(())
    }
}

fn provider_error(case: &TestCase, stage: &str, source: ProviderError) -> HarnessError {
    HarnessError::Provider {
        case: case.name.clone(),
        stage: stage.to_string(),
        source,
    }
}

fn failure(case: &TestCase, stage: &str, message: String) -> HarnessError {
    HarnessError::Failed {
        case: case.name.clone(),
        stage: stage.to_string(),
        message,
    }
}

fn first_error(result: ApplyResult) -> Option<ProviderError> {
    result.outcomes.into_iter().find_map(Result::err)
}

/// Data source results of an apply, keyed by `data.type.name`
fn data_states(result: &ApplyResult) -> HashMap<String, State> {
    result
        .outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Ok(EffectOutcome::Read { state }) => Some(state.clone()),
            _ => None,
        })
        .map(|state| (format!("data.{}", state.id.address()), state))
        .collect()
}

/// Flattened attributes without the ignored ones
fn comparable(state: &State, ignore: &[String]) -> BTreeMap<String, String> {
    state
        .flatten()
        .into_iter()
        .filter(|(key, _)| {
            !ignore.iter().any(|attr| {
                key == attr
                    || key
                        .strip_prefix(attr.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::resource::{ResourceId, Value};

    #[test]
    fn comparison_skips_ignored_subtrees() {
        let state = State::existing(
            ResourceId::new("flexibleengine_compute_instance_v2", "web"),
            HashMap::from([
                ("name".to_string(), Value::string("web")),
                (
                    "metadata".to_string(),
                    Value::Map(HashMap::from([("k".to_string(), Value::string("v"))])),
                ),
                ("metadata_extra".to_string(), Value::string("kept")),
            ]),
        );
        let kept = comparable(&state, &["metadata".to_string()]);
        assert_eq!(
            kept.keys().collect::<Vec<_>>(),
            vec!["metadata_extra", "name"]
        );
    }

    #[test]
    fn simulated_harness_uses_stand_in_values() {
        let harness = Harness::simulated().unwrap();
        assert!(!harness.is_live());
        assert_eq!(harness.env(AccEnv::FlavorId), "s3.small.1");
        let case = TestCase::new("needs-er").requires(&[AccEnv::ErInstanceId]);
        assert_eq!(harness.precheck(&case), None);
    }
}
