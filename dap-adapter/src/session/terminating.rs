// Terminating state: teardown in flight
//
// Constructed with the reason teardown began; that reason is the authority
// for why the session stopped. The exact teardown steps belong to a
// collaborator.

use super::DisconnectReason;
use crate::error::AdapterResult;
use crate::features::TeardownSteps;
use std::sync::Arc;
use tracing::info;

pub struct TerminatingState {
    reason: DisconnectReason,
    steps: Arc<dyn TeardownSteps>,
}

impl TerminatingState {
    pub fn new(reason: DisconnectReason, steps: Arc<dyn TeardownSteps>) -> Self {
        Self { reason, steps }
    }

    pub fn reason(&self) -> &DisconnectReason {
        &self.reason
    }

    /// Run protocol-specific teardown
    pub async fn install(&mut self) -> AdapterResult<()> {
        info!("Running teardown ({})", self.reason);
        self.steps.teardown().await
    }
}

/// Produces a terminating state for a given termination reason
pub trait TerminatingFactory: Send + Sync {
    fn create(&self, reason: DisconnectReason) -> TerminatingState;
}

/// Default factory: every terminating state shares one teardown collaborator
pub struct SteppedTerminatingFactory {
    steps: Arc<dyn TeardownSteps>,
}

impl SteppedTerminatingFactory {
    pub fn new(steps: Arc<dyn TeardownSteps>) -> Self {
        Self { steps }
    }
}

impl TerminatingFactory for SteppedTerminatingFactory {
    fn create(&self, reason: DisconnectReason) -> TerminatingState {
        TerminatingState::new(reason, self.steps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTeardown {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TeardownSteps for CountingTeardown {
        async fn teardown(&self) -> AdapterResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_install_runs_steps_and_keeps_reason() {
        let steps = Arc::new(CountingTeardown {
            runs: AtomicUsize::new(0),
        });
        let factory = SteppedTerminatingFactory::new(steps.clone());

        let mut state = factory.create(DisconnectReason::TransportClosed);
        state.install().await.unwrap();

        assert_eq!(steps.runs.load(Ordering::SeqCst), 1);
        assert_eq!(state.reason(), &DisconnectReason::TransportClosed);
    }
}
