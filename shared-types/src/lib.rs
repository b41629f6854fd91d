//! Shared types between the signing core, the gateway and the upload client
//!
//! These types cross a process or configuration boundary:
//! - YAML configuration (`StepTemplate`)
//! - HTTP responses and headers (`FailureKind`, `HealthStatus`, `ActionSummary`)

use serde::{Deserialize, Serialize};

/// Response header carrying the [`FailureKind`] of a failed signing request.
pub const FAILURE_HEADER: &str = "x-signbox-failure";

// ============================================================================
// Command templates
// ============================================================================

/// One step of a signing chain as written in configuration.
///
/// `command` may contain `{placeholders}` that are substituted with workspace
/// paths and profile variables before the step runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepTemplate {
    pub command: String,
    #[serde(default)]
    pub requires_auth: bool,
}

impl StepTemplate {
    pub fn new(command: impl Into<String>, requires_auth: bool) -> Self {
        Self {
            command: command.into(),
            requires_auth,
        }
    }
}

// ============================================================================
// Failures
// ============================================================================

/// Stable, non-sensitive classification of a failed signing request.
///
/// Safe to surface to callers: it never carries paths, commands or secrets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownAction,
    Configuration,
    PromptNotDetected,
    StepExitedNonZero,
    ChainTimedOut,
    OutputMissing,
    WorkspaceIo,
    SpawnFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnknownAction => "unknown_action",
            FailureKind::Configuration => "configuration",
            FailureKind::PromptNotDetected => "prompt_not_detected",
            FailureKind::StepExitedNonZero => "step_exited_non_zero",
            FailureKind::ChainTimedOut => "chain_timed_out",
            FailureKind::OutputMissing => "output_missing",
            FailureKind::WorkspaceIo => "workspace_io",
            FailureKind::SpawnFailed => "spawn_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "unknown_action" => FailureKind::UnknownAction,
            "configuration" => FailureKind::Configuration,
            "prompt_not_detected" => FailureKind::PromptNotDetected,
            "step_exited_non_zero" => FailureKind::StepExitedNonZero,
            "chain_timed_out" => FailureKind::ChainTimedOut,
            "output_missing" => FailureKind::OutputMissing,
            "workspace_io" => FailureKind::WorkspaceIo,
            "spawn_failed" => FailureKind::SpawnFailed,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// HTTP payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// Public view of a configured action. Never includes credentials or vars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionSummary {
    pub name: String,
    pub steps: usize,
    pub interactive_steps: usize,
}
