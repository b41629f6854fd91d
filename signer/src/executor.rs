//! Sequential execution of a command chain under one deadline.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chain::CommandChain;
use crate::driver::{DriverError, ProcessDriver, PromptAuth};
use crate::profile::ActionProfile;
use crate::workspace::Workspace;

/// Why a chain stopped. Steps are numbered from 1.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("step {step} ({command}) never showed its prompt within {window:?}")]
    PromptNotDetected {
        step: usize,
        command: String,
        window: Duration,
    },

    #[error("step {step} ({command}) exited with status {exit_code}")]
    StepExitedNonZero {
        step: usize,
        command: String,
        exit_code: u32,
        signal: Option<String>,
    },

    #[error("chain exceeded {timeout:?} during step {step} ({command})")]
    ChainTimedOut {
        step: usize,
        command: String,
        timeout: Duration,
    },

    #[error("step {step} ({command}) could not be run: {reason}")]
    Spawn {
        step: usize,
        command: String,
        reason: String,
    },
}

impl ChainError {
    pub fn step(&self) -> usize {
        match self {
            ChainError::PromptNotDetected { step, .. }
            | ChainError::StepExitedNonZero { step, .. }
            | ChainError::ChainTimedOut { step, .. }
            | ChainError::Spawn { step, .. } => *step,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainExecutor {
    driver: ProcessDriver,
}

impl ChainExecutor {
    pub fn new(driver: ProcessDriver) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &ProcessDriver {
        &self.driver
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// The deadline is computed once from the profile timeout and shared by
    /// all steps. The credential is only handed to steps that require it.
    /// Steps are never retried. On success the output is in the workspace.
    pub async fn execute(
        &self,
        chain: &CommandChain,
        profile: &ActionProfile,
        workspace: &Workspace,
    ) -> Result<(), ChainError> {
        let timeout = profile.timeout();
        let deadline = Instant::now() + timeout;

        for (idx, step) in chain.iter().enumerate() {
            let number = idx + 1;
            let command = step.command_line().to_string();

            if Instant::now() >= deadline {
                return Err(ChainError::ChainTimedOut {
                    step: number,
                    command,
                    timeout,
                });
            }

            let auth = step.requires_auth().then(|| PromptAuth {
                credential: profile.credential(),
                prompt: profile.prompt(),
            });

            debug!(
                action = profile.action(),
                workspace = workspace.id(),
                step = number,
                of = chain.len(),
                interactive = step.requires_auth(),
                "running step"
            );

            let outcome = match self.driver.run(step, auth, workspace.dir(), deadline).await {
                Ok(outcome) => outcome,
                Err(DriverError::PromptNotDetected {
                    window,
                    stream_closed,
                    transcript,
                }) => {
                    warn!(
                        action = profile.action(),
                        step = number,
                        stream_closed,
                        "prompt not detected"
                    );
                    debug!(step = number, %transcript, "step transcript");
                    return Err(ChainError::PromptNotDetected {
                        step: number,
                        command,
                        window,
                    });
                }
                Err(e) => {
                    return Err(ChainError::Spawn {
                        step: number,
                        command,
                        reason: e.to_string(),
                    })
                }
            };

            if outcome.timed_out {
                warn!(action = profile.action(), step = number, ?timeout, "chain timed out");
                debug!(step = number, transcript = %outcome.transcript, "step transcript");
                return Err(ChainError::ChainTimedOut {
                    step: number,
                    command,
                    timeout,
                });
            }

            match outcome.exit_code {
                Some(0) => {
                    info!(
                        action = profile.action(),
                        step = number,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "step finished"
                    );
                }
                code => {
                    let exit_code = code.unwrap_or(u32::MAX);
                    warn!(action = profile.action(), step = number, exit_code, "step failed");
                    debug!(step = number, transcript = %outcome.transcript, "step transcript");
                    return Err(ChainError::StepExitedNonZero {
                        step: number,
                        command,
                        exit_code,
                        signal: outcome.signal,
                    });
                }
            }
        }

        Ok(())
    }
}
