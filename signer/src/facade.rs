//! Single entry point for a signing request.
//!
//! ```text
//! Idle -> WorkspaceAllocated -> InputWritten -> ChainRunning -> {Succeeded, Failed} -> CleanedUp
//! ```
//!
//! `CleanedUp` is reached from every state after `Idle`: the workspace is
//! cleaned before [`Signer::process`] returns, whatever happened in between.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::driver::{ProcessDriver, DEFAULT_PROMPT_WINDOW};
use crate::error::SignError;
use crate::executor::ChainExecutor;
use crate::profile::{ActionProfile, ProfileResolver};
use crate::workspace::{Workspace, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    WorkspaceAllocated,
    InputWritten,
    ChainRunning,
    Succeeded,
    Failed,
    CleanedUp,
}

#[derive(Debug, Clone)]
pub struct SignerOptions {
    /// Directory for per-request files.
    pub workspace_root: PathBuf,
    /// How long an interactive step may take to show its prompt.
    pub prompt_window: Duration,
    /// Shell used to run command lines (`<shell> -c <line>`).
    pub shell: PathBuf,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            prompt_window: DEFAULT_PROMPT_WINDOW,
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

/// Orchestrates resolve → allocate → write → run → read → cleanup.
///
/// Holds no per-request state; share it behind an `Arc` across requests.
#[derive(Clone)]
pub struct Signer {
    resolver: Arc<dyn ProfileResolver>,
    workspaces: WorkspaceManager,
    executor: ChainExecutor,
}

impl Signer {
    pub fn new(resolver: Arc<dyn ProfileResolver>, options: SignerOptions) -> Self {
        let driver = ProcessDriver::new(options.prompt_window).with_shell(options.shell);
        Self {
            resolver,
            workspaces: WorkspaceManager::new(options.workspace_root),
            executor: ChainExecutor::new(driver),
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Sign `payload` with `action`, returning exactly the tool's output.
    pub async fn process(&self, action: &str, payload: &[u8]) -> Result<Vec<u8>, SignError> {
        let profile = self.resolver.resolve(action).await?;

        let mut workspace = self.workspaces.allocate()?;
        let mut tracker = PhaseTracker::new(workspace.id().to_string(), action);
        tracker.advance(RequestPhase::WorkspaceAllocated);
        info!(
            action,
            workspace = workspace.id(),
            bytes = payload.len(),
            "signing request started"
        );

        let result = self
            .run(&profile, &mut workspace, payload, &mut tracker)
            .await;

        match &result {
            Ok(signed) => {
                tracker.advance(RequestPhase::Succeeded);
                info!(action, workspace = workspace.id(), bytes = signed.len(), "signing request succeeded");
            }
            Err(err) => {
                tracker.advance(RequestPhase::Failed);
                let cause = err_source(err).unwrap_or_default();
                warn!(
                    action,
                    workspace = workspace.id(),
                    kind = %err.kind(),
                    error = %err,
                    %cause,
                    "signing request failed"
                );
            }
        }

        workspace.cleanup().await;
        tracker.advance(RequestPhase::CleanedUp);
        result
    }

    async fn run(
        &self,
        profile: &ActionProfile,
        workspace: &mut Workspace,
        payload: &[u8],
        tracker: &mut PhaseTracker,
    ) -> Result<Vec<u8>, SignError> {
        workspace.write_input(payload).await?;
        tracker.advance(RequestPhase::InputWritten);

        let chain = profile.template().render(workspace, profile.vars())?;
        tracker.advance(RequestPhase::ChainRunning);
        self.executor.execute(&chain, profile, workspace).await?;

        let signed = workspace.read_output().await?;
        if signed.is_empty() {
            return Err(SignError::OutputMissing);
        }
        Ok(signed)
    }
}

fn err_source(err: &SignError) -> Option<String> {
    std::error::Error::source(err).map(ToString::to_string)
}

struct PhaseTracker {
    workspace: String,
    action: String,
    phase: RequestPhase,
}

impl PhaseTracker {
    fn new(workspace: String, action: &str) -> Self {
        Self {
            workspace,
            action: action.to_string(),
            phase: RequestPhase::Idle,
        }
    }

    fn advance(&mut self, next: RequestPhase) {
        debug!(
            workspace = %self.workspace,
            action = %self.action,
            from = ?self.phase,
            to = ?next,
            "request phase"
        );
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use shared_types::{FailureKind, StepTemplate};

    use super::*;
    use crate::credential::Credential;
    use crate::profile::StaticProfiles;

    fn signer(dir: &std::path::Path, profile: ActionProfile) -> Signer {
        Signer::new(
            Arc::new(StaticProfiles::new().with(profile)),
            SignerOptions {
                workspace_root: dir.to_path_buf(),
                ..SignerOptions::default()
            },
        )
    }

    fn leftovers(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("signbox-"))
            .collect()
    }

    #[tokio::test]
    async fn test_process_returns_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ActionProfile::new(
            "copy",
            Credential::default(),
            "unused",
            vec![StepTemplate::new("tr a-z A-Z < {input} > {output}", false)],
            BTreeMap::new(),
            Duration::from_secs(10),
        )
        .unwrap();

        let signed = signer(dir.path(), profile)
            .process("copy", b"hello")
            .await
            .unwrap();

        assert_eq!(signed, b"HELLO");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_allocates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Signer::new(
            Arc::new(StaticProfiles::new()),
            SignerOptions {
                workspace_root: dir.path().to_path_buf(),
                ..SignerOptions::default()
            },
        );

        let err = signer.process("nope", b"x").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnknownAction);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_output_never_written_is_output_missing() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ActionProfile::new(
            "noop",
            Credential::default(),
            "unused",
            vec![StepTemplate::new("cat {input} > {tmp:side}", false)],
            BTreeMap::new(),
            Duration::from_secs(10),
        )
        .unwrap();

        let err = signer(dir.path(), profile)
            .process("noop", b"data")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::OutputMissing);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_still_cleans_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ActionProfile::new(
            "fail",
            Credential::default(),
            "unused",
            vec![
                StepTemplate::new("cp {input} {tmp:a}; cp {input} {output}", false),
                StepTemplate::new("exit 4", false),
            ],
            BTreeMap::new(),
            Duration::from_secs(10),
        )
        .unwrap();

        let err = signer(dir.path(), profile)
            .process("fail", b"data")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::StepExitedNonZero);
        assert!(leftovers(dir.path()).is_empty());
    }
}
