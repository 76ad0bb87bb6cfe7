// Cooperative stop signal for running job executions

use crate::domain::StepExecution;
use crate::error::{BatchError, Result};
use tokio::sync::watch;

/// Receiving side of a stop request
#[derive(Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopToken {
    /// Token that is never signalled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Check if stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the stop signal
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Sender dropped without signalling: nothing will ever stop us
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sending side of a stop request
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    /// Signal stop to every token
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a stop channel
pub fn stop_channel() -> (StopSignal, StopToken) {
    let (tx, rx) = watch::channel(false);
    (StopSignal { tx }, StopToken { rx })
}

/// Decides at chunk boundaries whether the step must stop
pub trait InterruptionPolicy: Send + Sync {
    /// `Err(BatchError::Interrupted)` when the step should stop
    fn check(&self, step_execution: &StepExecution) -> Result<()>;
}

/// Stops on a signalled token or a step flagged `terminate_only`
pub struct TokenInterruptionPolicy {
    token: StopToken,
}

impl TokenInterruptionPolicy {
    pub fn new(token: StopToken) -> Self {
        Self { token }
    }
}

impl InterruptionPolicy for TokenInterruptionPolicy {
    fn check(&self, step_execution: &StepExecution) -> Result<()> {
        if self.token.is_stopped() || step_execution.terminate_only {
            return Err(BatchError::Interrupted(format!(
                "Step {} interrupted by stop request",
                step_execution.step_name
            )));
        }
        Ok(())
    }
}
