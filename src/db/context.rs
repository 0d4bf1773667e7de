// Request context
// Cancellation and deadline for one Terraform operation

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ProviderResult};

/// Carries cancellation and an optional deadline through every blocking call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Child context cancelled together with this one, with an optionally tighter deadline
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout.map(|t| Instant::now() + t)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `fut` unless the context is cancelled or its deadline passes first.
    /// On cancellation the future is dropped before completion.
    pub async fn run<T, F>(&self, fut: F) -> ProviderResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(Instant::now());
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
                    res = tokio::time::timeout_at(deadline, fut) => {
                        res.unwrap_or(Err(ProviderError::Timeout(budget)))
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
                    res = fut => res,
                }
            }
        }
    }
}
