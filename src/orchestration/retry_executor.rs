//! Retry loop for collaborator calls, driven by resolved retry policies.

use super::retry_policy::{OperationKind, RetryPolicy, RetryPolicyResolver};
use crate::error::SyncError;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tagged result of a retried operation
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Ok(T),
    /// Retryable error whose attempt budget ran out
    Retryable { error: SyncError, attempts: u32 },
    /// Error that must not be retried
    Fatal(SyncError),
}

impl<T> RetryOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn into_result(self) -> crate::error::Result<T> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Retryable { error, .. } | Self::Fatal(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    resolver: Arc<RetryPolicyResolver>,
}

impl RetryExecutor {
    pub fn new(resolver: Arc<RetryPolicyResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<RetryPolicyResolver> {
        &self.resolver
    }

    /// Run `op` until it succeeds, fails fatally or exhausts its policy
    ///
    /// `op` receives the 0-based attempt number. Only transient kinds
    /// (network, timeout, ssl, server error, rate limit) are retried; every
    /// other error is fatal on first sight.
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        self.execute_as(operation, None, op).await
    }

    /// Like [`execute`](Self::execute), but budgets retries with the policy of
    /// `operation_kind` when one is given instead of the error's own policy
    pub async fn execute_as<T, F, Fut>(
        &self,
        operation: &str,
        operation_kind: Option<OperationKind>,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return RetryOutcome::Ok(value),
                Err(error) => error,
            };

            let kind = match error.retry_kind() {
                Some(kind) if kind.is_transient() => kind,
                _ => {
                    debug!(operation = %operation, code = error.code(), "Non-retryable failure");
                    return RetryOutcome::Fatal(error);
                }
            };

            let policy: RetryPolicy = match operation_kind {
                Some(operation_kind) => self.resolver.resolve(operation_kind, None).await,
                None => self.resolver.resolve(kind, None).await,
            };
            if !policy.should_retry(attempt) {
                warn!(
                    operation = %operation,
                    kind = %kind,
                    attempts = attempt + 1,
                    error = %error,
                    "Retry budget exhausted"
                );
                return RetryOutcome::Retryable {
                    error,
                    attempts: attempt + 1,
                };
            }

            let delay = policy.jittered_delay(attempt, self.resolver.jitter_max_seconds());
            warn!(
                operation = %operation,
                kind = %kind,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "🔄 Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::SyncErrorContext;
    use crate::orchestration::retry_policy::{ErrorKind, RetryPolicyOverride};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_executor() -> RetryExecutor {
        let mut config = RetryConfig::default();
        config.jitter_max_seconds = 0.0;
        let fast = RetryPolicyOverride {
            base_delay: Some(0.001),
            max_delay: Some(0.002),
            ..Default::default()
        };
        config.error_policies.insert("network".into(), fast.clone());
        config.error_policies.insert("timeout".into(), fast);
        RetryExecutor::new(Arc::new(RetryPolicyResolver::new(config)))
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let executor = fast_executor();
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute("count", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(SyncError::collaborator(ErrorKind::Network, "reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(outcome, RetryOutcome::Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_retryable() {
        let executor = fast_executor();
        let outcome: RetryOutcome<()> = executor
            .execute("count", |_| async {
                Err(SyncError::Timeout {
                    operation: "count".into(),
                    message: "slow".into(),
                })
            })
            .await;

        match outcome {
            RetryOutcome::Retryable { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_operation_kind_budget_overrides_error_budget() {
        let mut config = RetryConfig::default();
        config.jitter_max_seconds = 0.0;
        config.operation_policies.insert(
            "sync_products".into(),
            RetryPolicyOverride {
                max_attempts: Some(1),
                base_delay: Some(0.001),
                max_delay: Some(0.001),
                ..Default::default()
            },
        );
        let executor = RetryExecutor::new(Arc::new(RetryPolicyResolver::new(config)));
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = executor
            .execute_as("transfer", Some(OperationKind::SyncProducts), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::collaborator(ErrorKind::Network, "reset")) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Retryable { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_is_fatal_immediately() {
        let executor = fast_executor();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = executor
            .execute("validate", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::validation("bad", SyncErrorContext::default())) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.into_result().is_err());
    }

    #[tokio::test]
    async fn test_non_transient_kinds_are_fatal_immediately() {
        let executor = fast_executor();
        for kind in [ErrorKind::ClientError, ErrorKind::Concurrency, ErrorKind::Memory] {
            let calls = AtomicU32::new(0);
            let outcome: RetryOutcome<()> = executor
                .execute("transfer", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(SyncError::collaborator(kind, "rejected")) }
                })
                .await;

            assert!(matches!(outcome, RetryOutcome::Fatal(_)), "{kind} was retried");
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
