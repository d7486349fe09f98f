//! Waiter - Poll a vendor object until it reaches a target status
//!
//! The waiter is the only suspension point inside a CRUD handler. It polls
//! a refresh function on a fixed interval after an initial delay, and stops
//! when the object reaches a target status, leaves the pending set, the
//! deadline passes, or the operation context is cancelled.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::OpContext;
use crate::provider::{ProviderError, ProviderResult};

/// Parameters of one wait
#[derive(Debug, Clone)]
pub struct WaitDescriptor {
    /// Transitional statuses that keep the waiter polling
    pub pending: Vec<String>,
    /// Statuses that end the wait successfully
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Delay before the first poll
    pub delay: Duration,
    pub poll_interval: Duration,
    /// How long "not found" is tolerated while waiting for an object to appear
    pub not_found_grace: Duration,
    /// "Not found" ends the wait successfully (wait-for-deleted)
    pub not_found_is_target: bool,
    /// Errors for which the poll is retried
    pub retryable: fn(&ProviderError) -> bool,
}

impl WaitDescriptor {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            not_found_grace: Duration::from_secs(30),
            not_found_is_target: false,
            retryable: ProviderError::is_retryable,
        }
    }

    /// Wait until the object disappears (or reaches one of `target`)
    pub fn for_deletion(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        let mut desc = Self::new(pending, target, timeout);
        desc.not_found_is_target = true;
        desc
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_not_found_grace(mut self, grace: Duration) -> Self {
        self.not_found_grace = grace;
        self
    }

    pub fn with_retryable(mut self, retryable: fn(&ProviderError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Poll `refresh` until the object reaches a target status
///
/// `refresh` returns `Ok(Some((object, status)))`, `Ok(None)` when the vendor
/// reports the object as not found, or an error. Returns the object that
/// reached the target, or `None` when "not found" was the target.
pub async fn wait_for_state<T, F, Fut>(
    ctx: &OpContext,
    desc: &WaitDescriptor,
    mut refresh: F,
) -> ProviderResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Option<(T, String)>>>,
{
    let started = Instant::now();
    let deadline = ctx.deadline().min(started + desc.timeout);
    let mut last_status: Option<String> = None;

    sleep_until(ctx, (started + desc.delay).min(deadline)).await?;

    loop {
        if Instant::now() >= deadline {
            return Err(timeout_error(desc, last_status.as_deref()));
        }

        let polled = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => return Err(ProviderError::cancelled()),
            polled = tokio::time::timeout_at(deadline, refresh()) => polled,
        };
        let Ok(polled) = polled else {
            return Err(timeout_error(desc, last_status.as_deref()));
        };

        match polled {
            Ok(Some((object, status))) => {
                if desc.target.iter().any(|t| *t == status) {
                    log::debug!("{}: reached '{}'", ctx.operation, status);
                    return Ok(Some(object));
                }
                if !desc.pending.iter().any(|p| *p == status) {
                    return Err(ProviderError::unexpected_state(format!(
                        "unexpected state '{}', wanted target '{}'",
                        status,
                        desc.target.join(", ")
                    )));
                }
                log::debug!("{}: waiting, status '{}'", ctx.operation, status);
                last_status = Some(status);
            }
            Ok(None) => {
                if desc.not_found_is_target {
                    log::debug!("{}: object is gone", ctx.operation);
                    return Ok(None);
                }
                if started.elapsed() > desc.not_found_grace {
                    return Err(ProviderError::not_found(format!(
                        "object not found while waiting for '{}'",
                        desc.target.join(", ")
                    )));
                }
                log::debug!("{}: object not visible yet", ctx.operation);
            }
            Err(e) if (desc.retryable)(&e) => {
                log::warn!("{}: retrying after error: {}", ctx.operation, e);
            }
            Err(e) => return Err(e),
        }

        sleep_until(ctx, (Instant::now() + desc.poll_interval).min(deadline)).await?;
    }
}

async fn sleep_until(ctx: &OpContext, until: Instant) -> ProviderResult<()> {
    tokio::select! {
        biased;
        _ = ctx.cancellation_token().cancelled() => Err(ProviderError::cancelled()),
        _ = tokio::time::sleep_until(until) => Ok(()),
    }
}

fn timeout_error(desc: &WaitDescriptor, last_status: Option<&str>) -> ProviderError {
    let target = if desc.target.is_empty() {
        "deleted".to_string()
    } else {
        desc.target.join(", ")
    };
    match last_status {
        Some(status) => ProviderError::timeout(format!(
            "timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})",
            target, status, desc.timeout
        )),
        None => ProviderError::timeout(format!(
            "timeout while waiting for state to become '{}' (timeout: {:?})",
            target, desc.timeout
        )),
    }
}
