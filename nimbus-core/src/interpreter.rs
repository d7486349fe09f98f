//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter is the minimal in-process host: it refreshes state,
//! plans a document against it and executes the Effects of a Plan in
//! order, collecting the results. This is where side effects actually occur.

use std::collections::HashMap;

use crate::differ::create_plan;
use crate::document::{Document, address_of};
use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceId, State, Value};

/// State of every managed resource, keyed by resource id
pub type StateMap = HashMap<ResourceId, State>;

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Data source read succeeded
    Read { state: State },
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete then create succeeded
    Replaced { state: State },
    /// Delete succeeded
    Deleted { id: ResourceId },
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

/// Result of executing the entire Plan
#[derive(Debug)]
pub struct ApplyResult {
    pub outcomes: Vec<Result<EffectOutcome, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }

    /// Errors in execution order
    pub fn errors(&self) -> impl Iterator<Item = &ProviderError> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Re-read every resource in `states`; resources gone from the vendor are dropped
    pub async fn refresh(&self, states: &StateMap) -> ProviderResult<StateMap> {
        let mut refreshed = StateMap::new();
        for (id, prior) in states {
            let state = self.provider.read(prior).await?;
            if state.exists {
                refreshed.insert(id.clone(), state);
            }
        }
        Ok(refreshed)
    }

    /// Plan `document` against `states`
    ///
    /// Data sources are read while planning so their attributes resolve references.
    pub async fn plan(&self, document: &Document, states: &StateMap) -> ProviderResult<Plan> {
        let ordered = document
            .ordered()
            .map_err(|e| ProviderError::validation(e.to_string()))?;

        let mut known = addresses(states);
        let mut desired = Vec::with_capacity(ordered.len());
        for resource in &ordered {
            let resource = resolve_references(resource, &known);
            self.provider.validate(&resource)?;
            let unresolved = resource.attributes.values().any(Value::has_reference);
            if resource.is_data_source() && !unresolved {
                let state = self.provider.read_data_source(&resource).await?;
                known.insert(address_of(&resource), state);
            }
            desired.push(resource);
        }

        Ok(create_plan(
            |t| self.provider.schema(t, false),
            &desired,
            states,
        ))
    }

    /// Execute a Plan, interpreting all Effects and causing side effects
    ///
    /// `states` is updated after every effect, so a failed apply leaves the
    /// state of everything that did happen (including tainted partial creates).
    pub async fn apply(&self, plan: &Plan, states: &mut StateMap) -> ApplyResult {
        let mut outcomes = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut data = HashMap::new();

        for effect in plan.effects() {
            let result = self.execute_effect(effect, states, &mut data).await;

            match &result {
                Ok(_) => success_count += 1,
                Err(e) => {
                    log::warn!("{}", e);
                    failure_count += 1;
                    if !self.config.continue_on_error {
                        outcomes.push(result);
                        break;
                    }
                }
            }

            outcomes.push(result);
        }

        ApplyResult {
            outcomes,
            success_count,
            failure_count,
        }
    }

    /// Execute a single Effect
    async fn execute_effect(
        &self,
        effect: &Effect,
        states: &mut StateMap,
        data: &mut HashMap<String, State>,
    ) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        let mut known = addresses(states);
        known.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));

        match effect {
            Effect::Read(resource) => {
                let resource = resolved(resource, &known)?;
                let state = self.provider.read_data_source(&resource).await?;
                data.insert(address_of(&resource), state.clone());
                Ok(EffectOutcome::Read { state })
            }
            Effect::Create(resource) => {
                let resource = resolved(resource, &known)?;
                let state = self.create(&resource, states).await?;
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { from, to, .. } => {
                let to = resolved(to, &known)?;
                let state = self.provider.update(from, &to).await?;
                states.insert(state.id.clone(), state.clone());
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { from, to, .. } => {
                let to = resolved(to, &known)?;
                self.provider.delete(from).await?;
                states.remove(&from.id);
                let state = self.create(&to, states).await?;
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete(state) => {
                self.provider.delete(state).await?;
                states.remove(&state.id);
                Ok(EffectOutcome::Deleted {
                    id: state.id.clone(),
                })
            }
        }
    }

    async fn create(&self, resource: &Resource, states: &mut StateMap) -> ProviderResult<State> {
        match self.provider.create(resource).await {
            Ok(state) => {
                states.insert(state.id.clone(), state.clone());
                Ok(state)
            }
            Err(e) => {
                // The vendor object exists; keep it so the next plan replaces it
                if let Some(identifier) = &e.identifier {
                    let tainted = State::existing(resource.id.clone(), resource.attributes.clone())
                        .with_identifier(identifier.clone())
                        .with_tainted(true);
                    states.insert(resource.id.clone(), tainted);
                }
                Err(e)
            }
        }
    }

    /// Delete every resource in `states`
    ///
    /// Resources declared in `document` go in reverse dependency order, the
    /// rest in reverse id order before them.
    pub async fn destroy(&self, document: Option<&Document>, states: &mut StateMap) -> ApplyResult {
        let mut order: Vec<ResourceId> = Vec::new();
        if let Some(document) = document
            && let Ok(ordered) = document.ordered()
        {
            order = ordered
                .iter()
                .rev()
                .filter(|r| !r.is_data_source())
                .map(|r| r.id.clone())
                .collect();
        }
        let mut rest: Vec<ResourceId> = states
            .keys()
            .filter(|id| !order.contains(id))
            .cloned()
            .collect();
        rest.sort_by(|a, b| b.cmp(a));
        rest.extend(order);

        let mut plan = Plan::new();
        for id in rest {
            if let Some(state) = states.get(&id) {
                plan.add(Effect::Delete(state.clone()));
            }
        }
        self.apply(&plan, states).await
    }

    /// Import a live object into `states`
    pub async fn import(
        &self,
        id: &ResourceId,
        import_id: &str,
        states: &mut StateMap,
    ) -> ProviderResult<State> {
        let state = self.provider.import(id, import_id).await?;
        states.insert(id.clone(), state.clone());
        Ok(state)
    }
}

fn addresses(states: &StateMap) -> HashMap<String, State> {
    states
        .values()
        .filter(|s| s.exists)
        .map(|s| (s.id.address(), s.clone()))
        .collect()
}

/// Replace references whose target is known; unknown ones are kept
pub fn resolve_references(resource: &Resource, known: &HashMap<String, State>) -> Resource {
    Resource {
        id: resource.id.clone(),
        attributes: resource
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), resolve_value(v, known)))
            .collect(),
        read_only: resource.read_only,
    }
}

fn resolve_value(value: &Value, known: &HashMap<String, State>) -> Value {
    match value {
        Value::ResourceRef(address, attr) => known
            .get(address)
            .and_then(|state| state.get(attr))
            .unwrap_or_else(|| value.clone()),
        Value::List(items) => Value::List(items.iter().map(|v| resolve_value(v, known)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, known)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn resolved(resource: &Resource, known: &HashMap<String, State>) -> ProviderResult<Resource> {
    let resource = resolve_references(resource, known);
    if let Some(dep) = resource.dependencies().first() {
        return Err(ProviderError::validation(format!(
            "reference to '{}' cannot be resolved",
            dep
        ))
        .for_resource(resource.id.clone()));
    }
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BoxFuture, ErrorKind};
    use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider keeping objects in memory, assigning sequential identifiers
    struct TestProvider {
        schema: ResourceSchema,
        objects: Mutex<HashMap<String, HashMap<String, Value>>>,
        next: AtomicUsize,
        fail_create: bool,
    }

    impl TestProvider {
        fn new() -> Self {
            Self {
                schema: ResourceSchema::new("test_vpc_v1")
                    .attribute(AttributeSchema::new("name", AttributeType::String).required())
                    .attribute(
                        AttributeSchema::new("cidr", AttributeType::String)
                            .optional()
                            .force_new(),
                    )
                    .attribute(AttributeSchema::new("vpc_id", AttributeType::String).optional()),
                objects: Mutex::new(HashMap::new()),
                next: AtomicUsize::new(0),
                fail_create: false,
            }
        }
    }

    impl Provider for TestProvider {
        fn name(&self) -> &str {
            "test"
        }

        fn resource_types(&self) -> Vec<String> {
            vec!["test_vpc_v1".to_string()]
        }

        fn schema(&self, _resource_type: &str, _data_source: bool) -> Option<&ResourceSchema> {
            Some(&self.schema)
        }

        fn validate(&self, _resource: &Resource) -> ProviderResult<()> {
            Ok(())
        }

        fn read(&self, prior: &State) -> BoxFuture<'_, ProviderResult<State>> {
            let prior = prior.clone();
            Box::pin(async move {
                let identifier = prior.identifier.clone().unwrap_or_default();
                Ok(match self.objects.lock().unwrap().get(&identifier) {
                    Some(attrs) => State::existing(prior.id.clone(), attrs.clone())
                        .with_identifier(identifier),
                    None => State::not_found(prior.id.clone()),
                })
            })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let resource = resource.clone();
            Box::pin(async move {
                let identifier = format!("id-{}", self.next.fetch_add(1, Ordering::SeqCst));
                self.objects
                    .lock()
                    .unwrap()
                    .insert(identifier.clone(), resource.attributes.clone());
                if self.fail_create {
                    return Err(
                        ProviderError::timeout("stuck in BUILD").with_identifier(identifier),
                    );
                }
                Ok(State::existing(resource.id.clone(), resource.attributes.clone())
                    .with_identifier(identifier))
            })
        }

        fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let from = from.clone();
            let to = to.clone();
            Box::pin(async move {
                let identifier = from.identifier.clone().unwrap_or_default();
                self.objects
                    .lock()
                    .unwrap()
                    .insert(identifier.clone(), to.attributes.clone());
                Ok(State::existing(to.id.clone(), to.attributes.clone())
                    .with_identifier(identifier))
            })
        }

        fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
            let identifier = state.identifier.clone().unwrap_or_default();
            Box::pin(async move {
                self.objects.lock().unwrap().remove(&identifier);
                Ok(())
            })
        }

        fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
            let prior = State::existing(id.clone(), HashMap::new()).with_identifier(import_id);
            Box::pin(async move { self.read(&prior).await })
        }

        fn read_data_source(&self, _query: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            Box::pin(async { Err(ProviderError::unsupported("no data sources")) })
        }
    }

    fn document(cidr: &str) -> Document {
        Document::new()
            .with(
                Resource::new("test_vpc_v1", "child")
                    .with_attribute("name", Value::string("child"))
                    .with_attribute(
                        "vpc_id",
                        Value::ResourceRef("test_vpc_v1.main".to_string(), "id".to_string()),
                    ),
            )
            .with(
                Resource::new("test_vpc_v1", "main")
                    .with_attribute("name", Value::string("main"))
                    .with_attribute("cidr", Value::string(cidr)),
            )
    }

    #[tokio::test]
    async fn apply_empty_plan() {
        let interpreter = Interpreter::new(TestProvider::new());
        let mut states = StateMap::new();
        let result = interpreter.apply(&Plan::new(), &mut states).await;

        assert!(result.is_success());
        assert_eq!(result.success_count, 0);
    }

    #[tokio::test]
    async fn apply_resolves_references_in_dependency_order() {
        let interpreter = Interpreter::new(TestProvider::new());
        let mut states = StateMap::new();
        let plan = interpreter.plan(&document("10.0.0.0/16"), &states).await.unwrap();
        assert_eq!(plan.summary().create, 2);

        let result = interpreter.apply(&plan, &mut states).await;
        assert!(result.is_success());

        let main = &states[&ResourceId::new("test_vpc_v1", "main")];
        let child = &states[&ResourceId::new("test_vpc_v1", "child")];
        assert_eq!(child.get("vpc_id"), main.get("id"));

        let again = interpreter.plan(&document("10.0.0.0/16"), &states).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn force_new_change_replaces() {
        let interpreter = Interpreter::new(TestProvider::new());
        let mut states = StateMap::new();
        let plan = interpreter.plan(&document("10.0.0.0/16"), &states).await.unwrap();
        interpreter.apply(&plan, &mut states).await;

        let plan = interpreter.plan(&document("10.1.0.0/16"), &states).await.unwrap();
        let summary = plan.summary();
        assert_eq!((summary.create, summary.delete), (1, 1));
        let result = interpreter.apply(&plan, &mut states).await;
        assert!(result.is_success());
        assert_eq!(
            states[&ResourceId::new("test_vpc_v1", "main")].get("cidr"),
            Some(Value::string("10.1.0.0/16"))
        );
    }

    #[tokio::test]
    async fn failed_create_with_identifier_is_tainted() {
        let mut provider = TestProvider::new();
        provider.fail_create = true;
        let interpreter = Interpreter::new(provider);
        let mut states = StateMap::new();
        let doc = Document::new().with(
            Resource::new("test_vpc_v1", "main").with_attribute("name", Value::string("main")),
        );
        let plan = interpreter.plan(&doc, &states).await.unwrap();
        let result = interpreter.apply(&plan, &mut states).await;
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.errors().next().unwrap().kind, ErrorKind::Timeout);

        let state = &states[&ResourceId::new("test_vpc_v1", "main")];
        assert!(state.tainted);
        assert_eq!(state.identifier.as_deref(), Some("id-0"));

        let replan = interpreter.plan(&doc, &states).await.unwrap();
        assert!(matches!(replan.effects()[0], Effect::Replace { .. }));
    }

    #[tokio::test]
    async fn refresh_drops_drifted_resources_and_destroy_empties_state() {
        let interpreter = Interpreter::new(TestProvider::new());
        let mut states = StateMap::new();
        let plan = interpreter.plan(&document("10.0.0.0/16"), &states).await.unwrap();
        interpreter.apply(&plan, &mut states).await;

        interpreter.provider().objects.lock().unwrap().remove("id-0");
        let refreshed = interpreter.refresh(&states).await.unwrap();
        assert_eq!(refreshed.len(), 1);

        let mut states = refreshed;
        let result = interpreter.destroy(Some(&document("10.0.0.0/16")), &mut states).await;
        assert!(result.is_success());
        assert!(states.is_empty());
        assert!(interpreter.provider().objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_skips_effects() {
        let interpreter = Interpreter::new(TestProvider::new()).with_config(InterpreterConfig {
            dry_run: true,
            continue_on_error: false,
        });
        let mut states = StateMap::new();
        let plan = interpreter.plan(&document("10.0.0.0/16"), &states).await.unwrap();
        let result = interpreter.apply(&plan, &mut states).await;
        assert!(matches!(
            result.outcomes[0],
            Ok(EffectOutcome::Skipped { .. })
        ));
        assert!(states.is_empty());
    }
}
