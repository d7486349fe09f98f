//! Provider - Trait abstracting resource operations
//!
//! A Provider exposes the resource kinds of one cloud to the interpreter.
//! It is responsible for converting Effects into actual API calls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::resource::{Resource, ResourceId, State};
use crate::schema::{ResourceSchema, ValidationError};

/// Classification of a provider failure
///
/// Drives the retry policy of the REST client and the waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Desired state violates a schema rule
    Validation,
    /// Credential rejected
    Authentication,
    /// Vendor object does not exist
    NotFound,
    /// Another operation in progress, or invalid state for the transition
    Conflict,
    RateLimited,
    /// Transport failure or 5xx
    Transient,
    /// Rejected by the quota booker or the vendor
    QuotaExceeded,
    Timeout,
    Cancelled,
    /// Waiter saw a status outside the target and pending sets
    UnexpectedState,
    Unsupported,
    Internal,
}

impl ErrorKind {
    /// Conflict, rate-limit and transient errors may succeed when retried
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Conflict | ErrorKind::RateLimited | ErrorKind::Transient
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation error",
            ErrorKind::Authentication => "authentication error",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::Transient => "transient error",
            ErrorKind::QuotaExceeded => "quota exceeded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UnexpectedState => "unexpected state",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{}", s)
    }
}

/// CRUD operation a provider call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
    ReadDataSource,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
            Operation::ReadDataSource => "read data source",
        };
        write!(f, "{}", s)
    }
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub operation: Option<Operation>,
    /// Vendor request id (`X-Request-Id`), when the vendor returned one
    pub request_id: Option<String>,
    /// Identifier assigned by the vendor before the operation failed
    pub identifier: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] ", id.resource_type, id.name)?;
        }
        if let Some(op) = self.operation {
            write!(f, "{}: ", op)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(ref request_id) = self.request_id {
            write!(f, " (request id: {})", request_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            resource_id: None,
            operation: None,
            request_id: None,
            identifier: None,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::NotFound)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Timeout)
    }

    pub fn cancelled() -> Self {
        Self::new("operation cancelled").with_kind(ErrorKind::Cancelled)
    }

    pub fn unexpected_state(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::UnexpectedState)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::QuotaExceeded)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Unsupported)
    }

    /// Collapse schema validation errors into one error listing every path
    pub fn from_validation(errors: &[ValidationError]) -> Self {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::validation(message)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    /// Attach the operation, keeping one set closer to the failure
    pub fn during(mut self, operation: Operation) -> Self {
        self.operation.get_or_insert(operation);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Main Provider trait
///
/// Implemented by the registry of a cloud; the interpreter only talks to this.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "flexibleengine")
    fn name(&self) -> &str;

    /// Names of the managed resource kinds
    fn resource_types(&self) -> Vec<String>;

    /// Schema of a resource kind or data source
    fn schema(&self, resource_type: &str, data_source: bool) -> Option<&ResourceSchema>;

    /// Validate a desired resource against its schema
    fn validate(&self, resource: &Resource) -> ProviderResult<()>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist.
    fn read(&self, prior: &State) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the cloud identifier
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource
    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>>;

    /// Import a live object by its import identifier
    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>>;

    /// Evaluate a data source query
    fn read_data_source(&self, query: &Resource) -> BoxFuture<'_, ProviderResult<State>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<String> {
        (**self).resource_types()
    }

    fn schema(&self, resource_type: &str, data_source: bool) -> Option<&ResourceSchema> {
        (**self).schema(resource_type, data_source)
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        (**self).validate(resource)
    }

    fn read(&self, prior: &State) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(prior)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(from, to)
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(state)
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).import(id, import_id)
    }

    fn read_data_source(&self, query: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read_data_source(query)
    }
}

/// Shared providers, as used by concurrent interpreters
impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<String> {
        (**self).resource_types()
    }

    fn schema(&self, resource_type: &str, data_source: bool) -> Option<&ResourceSchema> {
        (**self).schema(resource_type, data_source)
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        (**self).validate(resource)
    }

    fn read(&self, prior: &State) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(prior)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(from, to)
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(state)
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).import(id, import_id)
    }

    fn read_data_source(&self, query: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read_data_source(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeError;

    #[test]
    fn display_includes_resource_operation_and_request_id() {
        let err = ProviderError::not_found("server gone")
            .for_resource(ResourceId::new("flexibleengine_compute_instance_v2", "web"))
            .during(Operation::Update)
            .with_request_id("req-42");
        assert_eq!(
            err.to_string(),
            "[flexibleengine_compute_instance_v2.web] update: server gone (request id: req-42)"
        );
    }

    #[test]
    fn during_keeps_innermost_operation() {
        let err = ProviderError::timeout("x")
            .during(Operation::Read)
            .during(Operation::Create);
        assert_eq!(err.operation, Some(Operation::Read));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::QuotaExceeded.is_retryable());
        assert!(!ErrorKind::Timeout.is_retryable());
    }

    #[test]
    fn validation_errors_are_joined_with_paths() {
        let errors = vec![
            ValidationError::new("name", TypeError::MissingRequired),
            ValidationError::new(
                "priority",
                TypeError::ValidationFailed {
                    message: "must be between 0 and 1000".to_string(),
                },
            ),
        ];
        let err = ProviderError::from_validation(&errors);
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("name:"));
        assert!(err.message.contains("priority:"));
    }
}
