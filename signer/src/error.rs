//! Error taxonomy at the facade boundary.
//!
//! Every failure of a signing request ends up as one [`SignError`]. The
//! `Display` output is for operators and may name steps, while
//! [`SignError::kind`] is the only part meant for callers.

use shared_types::FailureKind;

use crate::chain::TemplateError;
use crate::executor::ChainError;
use crate::profile::ResolveError;
use crate::workspace::WorkspaceError;

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("signing tool prompt not detected")]
    PromptNotDetected(#[source] ChainError),

    #[error("signing step exited with non-zero status")]
    StepExitedNonZero(#[source] ChainError),

    #[error("signing chain timed out")]
    ChainTimedOut(#[source] ChainError),

    #[error("signing step could not be started")]
    SpawnFailed(#[source] ChainError),

    #[error("signing chain produced no output")]
    OutputMissing,

    #[error("workspace io failure")]
    WorkspaceIo(#[source] WorkspaceError),
}

impl SignError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SignError::UnknownAction(_) => FailureKind::UnknownAction,
            SignError::Configuration(_) => FailureKind::Configuration,
            SignError::PromptNotDetected(_) => FailureKind::PromptNotDetected,
            SignError::StepExitedNonZero(_) => FailureKind::StepExitedNonZero,
            SignError::ChainTimedOut(_) => FailureKind::ChainTimedOut,
            SignError::SpawnFailed(_) => FailureKind::SpawnFailed,
            SignError::OutputMissing => FailureKind::OutputMissing,
            SignError::WorkspaceIo(_) => FailureKind::WorkspaceIo,
        }
    }
}

impl From<ChainError> for SignError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::PromptNotDetected { .. } => SignError::PromptNotDetected(err),
            ChainError::StepExitedNonZero { .. } => SignError::StepExitedNonZero(err),
            ChainError::ChainTimedOut { .. } => SignError::ChainTimedOut(err),
            ChainError::Spawn { .. } => SignError::SpawnFailed(err),
        }
    }
}

impl From<WorkspaceError> for SignError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::OutputMissing(_) => SignError::OutputMissing,
            other => SignError::WorkspaceIo(other),
        }
    }
}

impl From<ResolveError> for SignError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownAction(action) => SignError::UnknownAction(action),
            other => SignError::Configuration(other.to_string()),
        }
    }
}

impl From<TemplateError> for SignError {
    fn from(err: TemplateError) -> Self {
        SignError::Configuration(err.to_string())
    }
}
