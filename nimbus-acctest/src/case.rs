//! Scenarios: an ordered list of documents to apply, with their checks

use std::sync::Arc;

use nimbus_core::document::Document;
use nimbus_core::interpreter::StateMap;
use nimbus_core::quota::QuotaRequest;
use nimbus_core::resource::State;

use crate::check::Check;
use crate::env::AccEnv;

/// Runs before a step is planned; used to change the world out of band
pub type PreConfig = Arc<dyn Fn(&StateMap) + Send + Sync>;

/// Computes the import identifier from the applied state
pub type ImportId = Arc<dyn Fn(&State) -> Option<String> + Send + Sync>;

/// One document to plan and apply
#[derive(Clone)]
pub struct TestStep {
    pub(crate) document: Document,
    pub(crate) checks: Vec<Check>,
    pub(crate) expect_non_empty_plan: bool,
    pub(crate) expect_error: Option<String>,
    pub(crate) pre_config: Option<PreConfig>,
}

impl TestStep {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            checks: Vec::new(),
            expect_non_empty_plan: false,
            expect_error: None,
            pre_config: None,
        }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn checks(mut self, checks: impl IntoIterator<Item = Check>) -> Self {
        self.checks.extend(checks);
        self
    }

    /// The plan after apply is known not to be empty
    pub fn expect_non_empty_plan(mut self) -> Self {
        self.expect_non_empty_plan = true;
        self
    }

    /// Planning or applying must fail with an error matching `pattern`
    pub fn expect_error(mut self, pattern: &str) -> Self {
        self.expect_error = Some(pattern.to_string());
        self
    }

    pub fn pre_config(mut self, hook: impl Fn(&StateMap) + Send + Sync + 'static) -> Self {
        self.pre_config = Some(Arc::new(hook));
        self
    }
}

/// Re-import an applied resource and compare it with its state
#[derive(Clone)]
pub struct ImportStep {
    pub(crate) address: String,
    pub(crate) import_id: Option<ImportId>,
    pub(crate) ignore: Vec<String>,
}

impl ImportStep {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            import_id: None,
            ignore: Vec::new(),
        }
    }

    /// Import by something other than the state identifier
    pub fn with_id(
        mut self,
        id: impl Fn(&State) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.import_id = Some(Arc::new(id));
        self
    }

    /// Attributes (and everything below them) left out of the comparison
    pub fn ignore(mut self, attributes: &[&str]) -> Self {
        self.ignore.extend(attributes.iter().map(|a| a.to_string()));
        self
    }
}

/// A scenario from first apply to verified destroy
#[derive(Clone)]
pub struct TestCase {
    pub(crate) name: String,
    pub(crate) required_env: Vec<AccEnv>,
    pub(crate) quota: Vec<QuotaRequest>,
    pub(crate) steps: Vec<TestStep>,
    pub(crate) imports: Vec<ImportStep>,
}

impl TestCase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required_env: Vec::new(),
            quota: Vec::new(),
            steps: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Skip live runs unless these variables are set
    pub fn requires(mut self, vars: &[AccEnv]) -> Self {
        self.required_env.extend_from_slice(vars);
        self
    }

    /// Reserve quota for the whole scenario before the first step
    pub fn books(mut self, requests: Vec<QuotaRequest>) -> Self {
        self.quota.extend(requests);
        self
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn import(mut self, import: ImportStep) -> Self {
        self.imports.push(import);
        self
    }

    /// Document the scenario is destroyed with
    pub(crate) fn last_document(&self) -> Option<&Document> {
        self.steps.last().map(|s| &s.document)
    }
}
