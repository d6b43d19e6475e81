//! Timeout-bounded calls into blocking collaborators.

use crate::error::{EngineError, ProvisionError};
use std::time::Duration;
use tracing::debug;

/// Why a bounded call produced no value
#[derive(Debug)]
pub(crate) enum CallFailure {
    /// The collaborator returned an error
    Failed(anyhow::Error),
    /// No answer within the limit; the call keeps running detached
    TimedOut(Duration),
    /// The call panicked or its task was cancelled
    Aborted,
}

impl CallFailure {
    pub(crate) fn into_engine_error(self, op: &'static str) -> EngineError {
        match self {
            CallFailure::Failed(source) => EngineError::Rejected { op, source },
            CallFailure::TimedOut(after) => EngineError::Timeout { op, after },
            CallFailure::Aborted => EngineError::Aborted { op },
        }
    }

    pub(crate) fn into_provision_error(self) -> ProvisionError {
        match self {
            CallFailure::Failed(source) => ProvisionError::Refused(source),
            CallFailure::TimedOut(after) => ProvisionError::Timeout(after),
            CallFailure::Aborted => ProvisionError::Aborted,
        }
    }
}

/// Run `f` on the blocking pool, giving up after `limit`.
pub(crate) async fn run_bounded<T, F>(limit: Duration, f: F) -> Result<T, CallFailure>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    run_bounded_or_reap(limit, f, drop).await
}

/// Like [`run_bounded`], but a value that arrives after the timeout is
/// handed to `reap` instead of being dropped silently.
pub(crate) async fn run_bounded_or_reap<T, F, R>(
    limit: Duration,
    f: F,
    reap: R,
) -> Result<T, CallFailure>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
    R: FnOnce(T) + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(f);

    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(CallFailure::Failed(e)),
        Ok(Err(join_error)) => {
            debug!("Bounded call aborted: {}", join_error);
            Err(CallFailure::Aborted)
        }
        Err(_) => {
            tokio::spawn(async move {
                if let Ok(Ok(late)) = task.await {
                    debug!("Reaping value that arrived after timeout");
                    reap(late);
                }
            });
            Err(CallFailure::TimedOut(limit))
        }
    }
}
