use super::{AbortReason, DownloadOutcome};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// the single stop signal shared by every task of a download. the first trigger decides the
/// outcome, later triggers are no-ops.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    outcome: Arc<OnceLock<DownloadOutcome>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// returns true if this call was the one that triggered shutdown.
    pub fn complete(&self) -> bool {
        self.trigger(DownloadOutcome::Completed)
    }

    /// returns true if this call was the one that triggered shutdown.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.trigger(DownloadOutcome::Aborted(reason))
    }

    fn trigger(&self, outcome: DownloadOutcome) -> bool {
        let first = self.outcome.set(outcome).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn outcome(&self) -> Option<&DownloadOutcome> {
        self.outcome.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_first_trigger_wins() {
        let shutdown = ShutdownSignal::new();
        let observer = shutdown.clone();
        assert!(!observer.is_triggered());

        assert!(shutdown.abort(AbortReason::NoPeersLeft { remaining: 2 }));
        assert!(!shutdown.complete());
        assert!(!observer.abort(AbortReason::NoPeersLeft { remaining: 1 }));

        assert!(observer.is_triggered());
        assert_eq!(
            observer.outcome(),
            Some(&DownloadOutcome::Aborted(AbortReason::NoPeersLeft {
                remaining: 2
            }))
        );
    }

    #[tokio::test]
    async fn test_waiters_wake_up() {
        let shutdown = ShutdownSignal::new();
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.triggered().await }
        });

        shutdown.complete();
        waiter.await.unwrap();
        assert_eq!(shutdown.outcome(), Some(&DownloadOutcome::Completed));
    }
}
