//! Resource kinds - the generic CRUD state machine around a handler
//!
//! A [`ResourceHandler`] knows how to talk to the vendor for one kind of
//! object. [`ResourceKind`] wraps it with everything that is the same for
//! every kind: validation, defaults, quota booking, read-back after writes,
//! not-found handling, preservation of values the vendor never echoes,
//! timeouts and cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::{OpContext, TimeoutOverrides, Timeouts};
use crate::differ::{Diff, diff};
use crate::identifier::{IdShape, Identifier};
use crate::provider::{Operation, ProviderError, ProviderResult};
use crate::quota::{QuotaBooker, QuotaRequest};
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::{ResourceSchema, SchemaDefinitionError};

/// Vendor-facing half of a resource kind
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn schema(&self) -> ResourceSchema;

    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Layout of the import identifier
    fn id_shape(&self) -> IdShape {
        IdShape::Simple
    }

    /// Attributes that cannot be verified after an import
    fn import_ignore(&self) -> &'static [&'static str] {
        &[]
    }

    /// Quota consumed by creating `desired`
    async fn quota_demand(
        &self,
        _ctx: &OpContext,
        _desired: &Resource,
    ) -> ProviderResult<Vec<QuotaRequest>> {
        Ok(Vec::new())
    }

    /// Create the object and wait until it is usable; returns its identifier
    ///
    /// Errors after the vendor assigned an identifier must carry it
    /// (see [`keep_identifier`]).
    async fn create(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<String>;

    /// Current vendor attributes, or `None` when the object is gone
    async fn read(
        &self,
        ctx: &OpContext,
        prior: &State,
    ) -> ProviderResult<Option<HashMap<String, Value>>>;

    /// Apply the changed (non-force-new) paths and wait for the object to settle
    async fn update(
        &self,
        _ctx: &OpContext,
        _prior: &State,
        _desired: &Resource,
        _changed: &[String],
    ) -> ProviderResult<()> {
        Err(ProviderError::unsupported(
            "this resource cannot be updated in place",
        ))
    }

    /// Delete the object and wait until it is gone
    async fn delete(&self, ctx: &OpContext, prior: &State) -> ProviderResult<()>;

    /// State an import starts reading from
    fn import(&self, id: &ResourceId, identifier: &Identifier) -> ProviderResult<State> {
        Ok(State::existing(id.clone(), HashMap::new()).with_identifier(identifier.to_string()))
    }
}

/// Attach a vendor-assigned identifier to the error of `result`
pub fn keep_identifier<T>(result: ProviderResult<T>, identifier: &str) -> ProviderResult<T> {
    result.map_err(|e| e.with_identifier(identifier))
}

/// A registered resource kind
pub struct ResourceKind {
    schema: ResourceSchema,
    timeouts: Timeouts,
    handler: Arc<dyn ResourceHandler>,
}

impl ResourceKind {
    /// Wrap a handler, checking its schema definition
    pub fn new(handler: Arc<dyn ResourceHandler>) -> Result<Self, SchemaDefinitionError> {
        let schema = handler.schema();
        schema.check()?;
        Ok(Self {
            schema,
            timeouts: handler.timeouts(),
            handler,
        })
    }

    pub fn with_timeout_overrides(mut self, overrides: &TimeoutOverrides) -> Self {
        self.timeouts = self.timeouts.merge(overrides);
        self
    }

    pub fn name(&self) -> &str {
        &self.schema.resource_type
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn import_ignore(&self) -> &'static [&'static str] {
        self.handler.import_ignore()
    }

    fn context(&self, operation: Operation, cancel: &CancellationToken) -> OpContext {
        OpContext::new(operation, self.timeouts.for_operation(operation)).with_parent(cancel)
    }

    pub fn validate(&self, desired: &Resource) -> ProviderResult<()> {
        self.schema
            .validate(&desired.attributes)
            .map_err(|errors| {
                ProviderError::from_validation(&errors).for_resource(desired.id.clone())
            })
    }

    fn with_defaults(&self, desired: &Resource) -> Resource {
        Resource {
            id: desired.id.clone(),
            attributes: self.schema.apply_defaults(&desired.attributes),
            read_only: desired.read_only,
        }
    }

    /// Validate, book quota, create, wait and read back
    ///
    /// Quota booked for the create is released whatever the outcome.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        booker: Option<&QuotaBooker>,
        desired: &Resource,
    ) -> ProviderResult<State> {
        let ctx = self.context(Operation::Create, cancel);
        self.validate(desired)?;
        let desired = self.with_defaults(desired);

        let token = match booker {
            Some(booker) => {
                let demand = self
                    .handler
                    .quota_demand(&ctx, &desired)
                    .await
                    .map_err(|e| e.for_resource(desired.id.clone()).during(Operation::Create))?;
                let token = booker
                    .book(&demand)
                    .await
                    .map_err(|e| e.for_resource(desired.id.clone()).during(Operation::Create))?;
                Some(token)
            }
            None => None,
        };

        let result = self.create_and_read(&ctx, &desired).await;

        if let (Some(booker), Some(token)) = (booker, token) {
            booker.release(token).await;
        }
        result.map_err(|e| e.for_resource(desired.id.clone()).during(Operation::Create))
    }

    async fn create_and_read(&self, ctx: &OpContext, desired: &Resource) -> ProviderResult<State> {
        let identifier = self.handler.create(ctx, desired).await?;
        log::info!("{}: created {}", desired.id, identifier);

        let seed = State::existing(desired.id.clone(), desired.attributes.clone())
            .with_identifier(identifier.clone());
        let state = keep_identifier(self.read_state(ctx, &seed).await, &identifier)?;
        if !state.exists {
            return Err(ProviderError::unexpected_state(
                "object disappeared right after it was created",
            )
            .with_identifier(identifier));
        }
        Ok(state)
    }

    /// Refresh `prior` from the vendor; a vanished object yields `State::not_found`
    pub async fn read(&self, cancel: &CancellationToken, prior: &State) -> ProviderResult<State> {
        let ctx = self.context(Operation::Read, cancel);
        let state = self
            .read_state(&ctx, prior)
            .await
            .map_err(|e| e.for_resource(prior.id.clone()).during(Operation::Read))?;
        if !state.exists && prior.identifier.is_some() {
            log::warn!(
                "{}: {} not found, removing from state",
                prior.id,
                prior.identifier.as_deref().unwrap_or_default()
            );
        }
        Ok(state)
    }

    async fn read_state(&self, ctx: &OpContext, prior: &State) -> ProviderResult<State> {
        let Some(identifier) = prior.identifier.clone() else {
            return Ok(State::not_found(prior.id.clone()));
        };

        let attributes = match self.handler.read(ctx, prior).await {
            Ok(Some(attributes)) => attributes,
            Ok(None) => return Ok(State::not_found(prior.id.clone())),
            Err(e) if e.is_not_found() => return Ok(State::not_found(prior.id.clone())),
            Err(e) => return Err(e),
        };

        let mut attributes = self.schema.retain_declared(attributes);
        for (name, attr) in &self.schema.attributes {
            if attr.is_preserved() {
                attributes.remove(name);
                if let Some(value) = prior.attributes.get(name) {
                    attributes.insert(name.clone(), value.clone());
                }
            }
        }

        Ok(State::existing(prior.id.clone(), attributes)
            .with_identifier(identifier)
            .with_tainted(prior.tainted))
    }

    /// Update in place and read back
    ///
    /// Fails when a force-new attribute changed or the object no longer exists.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        prior: &State,
        desired: &Resource,
    ) -> ProviderResult<State> {
        let ctx = self.context(Operation::Update, cancel);
        self.validate(desired)?;
        let desired = self.with_defaults(desired);
        self.update_and_read(&ctx, prior, &desired)
            .await
            .map_err(|e| e.for_resource(desired.id.clone()).during(Operation::Update))
    }

    async fn update_and_read(
        &self,
        ctx: &OpContext,
        prior: &State,
        desired: &Resource,
    ) -> ProviderResult<State> {
        let Some(identifier) = prior.identifier.clone() else {
            return Err(ProviderError::not_found("resource has no identifier"));
        };

        match diff(&self.schema, desired, prior) {
            Diff::Create(_) => return Err(ProviderError::not_found("resource does not exist")),
            Diff::Replace {
                changed_attributes, ..
            } => {
                return Err(ProviderError::validation(format!(
                    "changes to {} require replacement",
                    changed_attributes.join(", ")
                )));
            }
            Diff::Update {
                changed_attributes, ..
            } => {
                log::info!("{}: updating {}", desired.id, changed_attributes.join(", "));
                self.handler
                    .update(ctx, prior, desired, &changed_attributes)
                    .await?;
            }
            Diff::NoChange(_) => {}
        }

        let next = State::existing(desired.id.clone(), desired.attributes.clone())
            .with_identifier(identifier);
        let state = self.read_state(ctx, &next).await?;
        if !state.exists {
            return Err(ProviderError::not_found(
                "object disappeared while it was being updated",
            ));
        }
        Ok(state)
    }

    /// Delete; an object that is already gone counts as deleted
    pub async fn delete(&self, cancel: &CancellationToken, prior: &State) -> ProviderResult<()> {
        let Some(identifier) = prior.identifier.as_deref() else {
            return Ok(());
        };
        let ctx = self.context(Operation::Delete, cancel);
        match self.handler.delete(&ctx, prior).await {
            Ok(()) => {
                log::info!("{}: deleted {}", prior.id, identifier);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                log::warn!("{}: {} already gone", prior.id, identifier);
                Ok(())
            }
            Err(e) => Err(e.for_resource(prior.id.clone()).during(Operation::Delete)),
        }
    }

    /// Populate state for a live object from its import identifier
    pub async fn import(
        &self,
        cancel: &CancellationToken,
        id: &ResourceId,
        import_id: &str,
    ) -> ProviderResult<State> {
        let ctx = self.context(Operation::Import, cancel);
        let result = async {
            let identifier = Identifier::parse(import_id, self.handler.id_shape())
                .map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))?;
            let seed = self.handler.import(id, &identifier)?;
            let state = self.read_state(&ctx, &seed).await?;
            if !state.exists {
                return Err(ProviderError::not_found(format!(
                    "cannot import non-existent remote object '{}'",
                    import_id
                )));
            }
            Ok(state)
        }
        .await;
        result.map_err(|e| e.for_resource(id.clone()).during(Operation::Import))
    }
}

/// What a data source does when its filter matches several objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiMatch {
    First,
    /// Latest `created` attribute wins
    MostRecent,
    Error,
}

/// Result layout of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataShape {
    /// Exactly one object whose attributes become the data source's attributes
    Single(MultiMatch),
    /// Every match, collected under the named list attribute
    List(&'static str),
}

/// Vendor-facing half of a data source
#[async_trait]
pub trait DataSourceHandler: Send + Sync {
    fn schema(&self) -> ResourceSchema;

    fn shape(&self) -> DataShape;

    /// Objects matching the filter, each with an `id` attribute
    async fn query(
        &self,
        ctx: &OpContext,
        filter: &Resource,
    ) -> ProviderResult<Vec<HashMap<String, Value>>>;
}

/// A registered data source
pub struct DataSourceKind {
    schema: ResourceSchema,
    handler: Arc<dyn DataSourceHandler>,
}

impl DataSourceKind {
    pub fn new(handler: Arc<dyn DataSourceHandler>) -> Result<Self, SchemaDefinitionError> {
        let schema = handler.schema();
        schema.check()?;
        Ok(Self { schema, handler })
    }

    pub fn name(&self) -> &str {
        &self.schema.resource_type
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub fn validate(&self, filter: &Resource) -> ProviderResult<()> {
        self.schema
            .validate(&filter.attributes)
            .map_err(|errors| {
                ProviderError::from_validation(&errors).for_resource(filter.id.clone())
            })
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        filter: &Resource,
    ) -> ProviderResult<State> {
        let ctx = OpContext::new(Operation::ReadDataSource, Timeouts::default().read)
            .with_parent(cancel);
        self.validate(filter)?;
        let result = async {
            let matches = self.handler.query(&ctx, filter).await?;
            log::debug!("{}: {} match(es)", filter.id, matches.len());
            self.shape_result(filter, matches)
        }
        .await;
        result.map_err(|e| e.for_resource(filter.id.clone()).during(Operation::ReadDataSource))
    }

    fn shape_result(
        &self,
        filter: &Resource,
        matches: Vec<HashMap<String, Value>>,
    ) -> ProviderResult<State> {
        let mut attributes = filter.attributes.clone();
        let identifier = match self.handler.shape() {
            DataShape::Single(policy) => {
                let chosen = select_one(matches, policy)?;
                let identifier = chosen
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ProviderError::new("matched object has no id"))?;
                attributes.extend(chosen);
                identifier
            }
            DataShape::List(attribute) => {
                let mut ids: Vec<String> = matches
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect();
                ids.sort();
                let identifier = list_identifier(&ids);
                attributes.insert(
                    attribute.to_string(),
                    Value::List(matches.into_iter().map(Value::Map).collect()),
                );
                attributes.insert(
                    "ids".to_string(),
                    Value::List(ids.into_iter().map(Value::String).collect()),
                );
                identifier
            }
        };
        let attributes = self.schema.retain_declared(attributes);
        Ok(State::existing(filter.id.clone(), attributes).with_identifier(identifier))
    }
}

/// Identifier of a list data source read: the sorted ids joined by `,`
///
/// Stable across processes; an empty result is identified as `none`.
pub fn list_identifier(sorted_ids: &[String]) -> String {
    if sorted_ids.is_empty() {
        "none".to_string()
    } else {
        sorted_ids.join(",")
    }
}

/// Apply a multi-match policy to a data source query result
pub fn select_one(
    mut matches: Vec<HashMap<String, Value>>,
    policy: MultiMatch,
) -> ProviderResult<HashMap<String, Value>> {
    if matches.is_empty() {
        return Err(ProviderError::not_found(
            "your query returned no results, please change your search criteria and try again",
        ));
    }
    if matches.len() == 1 {
        return Ok(matches.remove(0));
    }
    match policy {
        MultiMatch::First => Ok(matches.remove(0)),
        MultiMatch::MostRecent => {
            let created = |m: &HashMap<String, Value>| {
                m.get("created")
                    .and_then(Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            };
            matches.sort_by_key(created);
            matches
                .pop()
                .ok_or_else(|| ProviderError::new("no match left after sorting"))
        }
        MultiMatch::Error => Err(ProviderError::validation(format!(
            "your query returned {} results, please try a more specific search criteria",
            matches.len()
        ))),
    }
}
