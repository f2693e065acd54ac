//! Deadline and cancellation plumbing for agent operations.
//!
//! Deadlines are not soft: when the outer deadline elapses the operation
//! returns [`AgentError::DeadlineExceeded`] (or [`AgentError::Cancelled`], or
//! the upstream error if it raced in first) even if some underlying primitive
//! is still running — the work is abandoned and its result dropped.

use std::future::Future;
use std::time::Duration;

use custodia_tpm::CancelToken;

use crate::error::AgentError;

/// Race `fut` against `deadline` and `cancel` in place.
///
/// Use for inner deadlines on futures that borrow from the caller.
pub async fn with_deadline<T>(
    deadline: Duration,
    cancel: &CancelToken,
    fut: impl Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    tokio::select! {
        result = fut => result,
        () = cancel.cancelled() => Err(AgentError::Cancelled),
        () = tokio::time::sleep(deadline) => Err(AgentError::DeadlineExceeded),
    }
}

/// Run an operation body on its own task, bounded by `deadline` and `cancel`.
///
/// The task is aborted when the deadline or cancellation wins the race, and a
/// panic inside the body is caught and surfaced as [`AgentError::Internal`]
/// instead of taking the process down.
pub async fn supervise<T, F>(
    deadline: Duration,
    cancel: &CancelToken,
    fut: F,
) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    let mut handle = tokio::spawn(fut);
    tokio::select! {
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                tracing::error!("operation worker panicked");
                Err(AgentError::internal("operation worker panicked"))
            }
            Err(_) => Err(AgentError::Cancelled),
        },
        () = cancel.cancelled() => {
            handle.abort();
            Err(AgentError::Cancelled)
        }
        () = tokio::time::sleep(deadline) => {
            handle.abort();
            Err(AgentError::DeadlineExceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inner_value_wins_within_deadline() {
        let cancel = CancelToken::new();
        let result = with_deadline(Duration::from_secs(1), &cancel, async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn deadline_beats_slow_future() {
        let cancel = CancelToken::new();
        let result = with_deadline(Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AgentError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn cancellation_beats_slow_future() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let result = with_deadline(Duration::from_secs(5), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn supervise_catches_panics() {
        let cancel = CancelToken::new();
        let result: Result<(), _> = supervise(Duration::from_secs(1), &cancel, async {
            panic!("crypto worker blew up");
        })
        .await;
        assert!(matches!(result, Err(AgentError::Internal { .. })));
    }

    #[tokio::test]
    async fn supervise_aborts_on_deadline() {
        let cancel = CancelToken::new();
        let result: Result<(), _> = supervise(Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AgentError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn supervise_short_circuits_when_already_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            supervise(Duration::from_secs(1), &cancel, async { Ok(()) }).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
