//! Operation context - deadline and cancellation carried by every CRUD call

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::provider::{Operation, ProviderError, ProviderResult};

/// Per-operation timeouts of a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(10 * 60),
            delete: Duration::from_secs(10 * 60),
        }
    }
}

impl Timeouts {
    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = timeout;
        self
    }

    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }

    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
            Operation::Read | Operation::Import | Operation::ReadDataSource => self.read,
        }
    }

    /// Apply overrides, keeping values that are not overridden
    pub fn merge(mut self, overrides: &TimeoutOverrides) -> Self {
        if let Some(t) = overrides.create {
            self.create = t;
        }
        if let Some(t) = overrides.read {
            self.read = t;
        }
        if let Some(t) = overrides.update {
            self.update = t;
        }
        if let Some(t) = overrides.delete {
            self.delete = t;
        }
        self
    }
}

/// Timeout overrides from provider configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutOverrides {
    pub create: Option<Duration>,
    pub read: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

/// Context of one CRUD call: the operation, its deadline and a cancellation token
#[derive(Debug, Clone)]
pub struct OpContext {
    pub operation: Operation,
    deadline: Instant,
    cancel: CancellationToken,
}

impl OpContext {
    pub fn new(operation: Operation, timeout: Duration) -> Self {
        Self {
            operation,
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel this context whenever `parent` is cancelled
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run a vendor call under this context
    ///
    /// The future is dropped (and its HTTP request aborted) when the context
    /// is cancelled or its deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> ProviderResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::cancelled()),
            _ = tokio::time::sleep_until(self.deadline) => Err(ProviderError::timeout(format!(
                "{} did not finish before its deadline",
                self.operation
            ))),
            result = fut => result,
        }
    }

    /// Sleep for `duration`, returning early with an error on cancellation
    pub async fn sleep(&self, duration: Duration) -> ProviderResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProviderError::cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorKind;

    #[test]
    fn timeouts_merge_overrides() {
        let merged = Timeouts::default().merge(&TimeoutOverrides {
            create: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        assert_eq!(merged.create, Duration::from_secs(30));
        assert_eq!(merged.delete, Duration::from_secs(600));
        assert_eq!(merged.for_operation(Operation::Import), merged.read);
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_at_deadline() {
        let ctx = OpContext::new(Operation::Create, Duration::from_secs(5));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_reaches_child() {
        let parent = CancellationToken::new();
        let ctx = OpContext::new(Operation::Delete, Duration::from_secs(60)).with_parent(&parent);
        parent.cancel();
        assert!(ctx.is_cancelled());
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
