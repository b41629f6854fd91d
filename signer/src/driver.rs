//! Interactive process driver
//!
//! Runs one [`CommandStep`] under a pseudo-terminal so the tool believes an
//! operator is present, answers a single prompt with the credential, then
//! drains output until the stream closes and the child has been reaped.
//!
//! Per-step state machine:
//!
//! ```text
//! Spawned -> AwaitingPrompt -> CredentialSent -> Draining -> Exited
//!    |             |                                 |
//!    +-------------+------------> TimedOut <---------+
//! ```
//!
//! Non-interactive steps go straight from `Spawned` to `Draining`. The chain
//! deadline bounds every suspension point; the prompt window only bounds
//! `AwaitingPrompt`. Once the child has been reaped its process group is
//! killed with `SIGKILL`, so background jobs never outlive the step; the same
//! happens when the driver gives up on a child or its future is dropped. The
//! short tail read after exit is outside the deadline: a reaped child is never
//! reported as timed out.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, ChildKiller as _, CommandBuilder, MasterPty, PtySize};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::chain::CommandStep;
use crate::credential::Credential;

pub const DEFAULT_PROMPT_WINDOW: Duration = Duration::from_secs(5);

/// Diagnostics tail kept per step.
const TRANSCRIPT_LIMIT: usize = 8 * 1024;
/// Written into the transcript in place of the secret.
const REDACTED: &[u8] = b"[redacted]";
/// Prompt search window; older output cannot complete a match.
const PROMPT_SEARCH_LIMIT: usize = 4 * 1024;
/// How long to keep reading buffered output once the child has exited.
const TAIL_GRACE: Duration = Duration::from_millis(500);
/// How long to wait for a killed child to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Spawned,
    AwaitingPrompt,
    CredentialSent,
    Draining,
    Exited,
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to spawn command on pty: {0}")]
    Spawn(String),

    #[error("prompt not detected within {window:?}")]
    PromptNotDetected {
        window: Duration,
        /// The child's output ended before the prompt appeared.
        stream_closed: bool,
        transcript: String,
    },

    #[error("pty io error: {0}")]
    Io(String),
}

/// Prompt/response exchange for an interactive step.
#[derive(Debug, Clone, Copy)]
pub struct PromptAuth<'a> {
    pub credential: &'a Credential,
    pub prompt: &'a Regex,
}

/// Result of one driven step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// `None` when the step timed out; never read as success in that case.
    pub exit_code: Option<u32>,
    pub signal: Option<String>,
    pub timed_out: bool,
    pub credential_sent: bool,
    pub phase: DriverPhase,
    /// Redacted tail of the terminal output.
    pub transcript: String,
    pub elapsed: Duration,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Spawns steps on a fresh pty each time; holds no per-request state.
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    shell: PathBuf,
    prompt_window: Duration,
}

impl Default for ProcessDriver {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_WINDOW)
    }
}

impl ProcessDriver {
    pub fn new(prompt_window: Duration) -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            prompt_window,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn prompt_window(&self) -> Duration {
        self.prompt_window
    }

    /// Run `step` in `workdir` until it exits or `deadline` passes.
    ///
    /// `auth` must be `Some` exactly for steps that expect a prompt.
    pub async fn run(
        &self,
        step: &CommandStep,
        auth: Option<PromptAuth<'_>>,
        workdir: &Path,
        deadline: Instant,
    ) -> Result<StepOutcome, DriverError> {
        let started = Instant::now();
        let secret = auth.map(|a| a.credential.clone());
        let mut session = PtySession::spawn(&self.shell, step.command_line(), workdir, secret)?;

        let driven = tokio::time::timeout_at(deadline, self.drive(&mut session, auth)).await;
        match driven {
            Ok(Ok(exit)) => {
                session.collect_tail().await;
                session.enter(DriverPhase::Exited);
                Ok(StepOutcome {
                    exit_code: Some(exit.exit_code()),
                    signal: exit.signal().map(ToString::to_string),
                    timed_out: false,
                    credential_sent: session.credential_sent,
                    phase: session.phase,
                    transcript: session.transcript.render(),
                    elapsed: started.elapsed(),
                })
            }
            Ok(Err(err)) => {
                session.terminate().await;
                Err(match err {
                    DriverError::PromptNotDetected {
                        window,
                        stream_closed,
                        ..
                    } => DriverError::PromptNotDetected {
                        window,
                        stream_closed,
                        transcript: session.transcript.render(),
                    },
                    other => other,
                })
            }
            Err(_) => {
                session.enter(DriverPhase::TimedOut);
                session.terminate().await;
                Ok(StepOutcome {
                    exit_code: None,
                    signal: None,
                    timed_out: true,
                    credential_sent: session.credential_sent,
                    phase: DriverPhase::TimedOut,
                    transcript: session.transcript.render(),
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    async fn drive(
        &self,
        session: &mut PtySession,
        auth: Option<PromptAuth<'_>>,
    ) -> Result<portable_pty::ExitStatus, DriverError> {
        if let Some(auth) = auth {
            session.enter(DriverPhase::AwaitingPrompt);
            let window_end = Instant::now() + self.prompt_window;
            let seen = tokio::time::timeout_at(window_end, session.wait_for(auth.prompt)).await;
            match seen {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    return Err(DriverError::PromptNotDetected {
                        window: self.prompt_window,
                        stream_closed: seen.is_ok(),
                        transcript: String::new(),
                    })
                }
            }
            session.send_line(auth.credential).await?;
            session.enter(DriverPhase::CredentialSent);
        }

        session.enter(DriverPhase::Draining);
        session.drain().await
    }
}

// ============================================================================
// PTY session
// ============================================================================

struct PtySession {
    phase: DriverPhase,
    pid: Option<u32>,
    guard: ProcessGroupGuard,
    output: mpsc::Receiver<Vec<u8>>,
    /// Held until the child is reaped: dropping it sends EOF to the tool.
    writer: Option<Box<dyn Write + Send>>,
    exit: Option<JoinHandle<std::io::Result<portable_pty::ExitStatus>>>,
    stream_open: bool,
    transcript: Transcript,
    /// Raw bytes searched for the prompt; decoded as a whole so a character
    /// split across reads still matches.
    pending: Vec<u8>,
    credential_sent: bool,
    _master: Box<dyn MasterPty + Send>,
}

impl PtySession {
    fn spawn(
        shell: &Path,
        command_line: &str,
        workdir: &Path,
        secret: Option<Credential>,
    ) -> Result<Self, DriverError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DriverError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.arg("-c");
        cmd.arg(command_line);
        cmd.cwd(workdir);
        cmd.env("TERM", "dumb");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DriverError::Spawn(e.to_string()))?;
        // Only the child may hold the slave, otherwise EOF never arrives.
        drop(pair.slave);

        let pid = child.process_id();
        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| pair.master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DriverError::Spawn(format!("failed to attach to pty: {e}")));
            }
        };

        debug!(pid, "spawned step on pty");

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        tokio::task::spawn_blocking(move || pump_output(reader, tx));
        let exit = tokio::task::spawn_blocking(move || child.wait());

        Ok(Self {
            phase: DriverPhase::Spawned,
            pid,
            guard: ProcessGroupGuard::new(pid),
            output: rx,
            writer: Some(writer),
            exit: Some(exit),
            stream_open: true,
            transcript: Transcript::new(TRANSCRIPT_LIMIT, secret),
            pending: Vec::new(),
            credential_sent: false,
            _master: pair.master,
        })
    }

    fn enter(&mut self, next: DriverPhase) {
        trace!(pid = self.pid, from = ?self.phase, to = ?next, "driver phase");
        self.phase = next;
    }

    /// Read until `prompt` matches. `false` means the stream ended first.
    async fn wait_for(&mut self, prompt: &Regex) -> bool {
        while let Some(chunk) = self.output.recv().await {
            self.transcript.push(&chunk);
            self.pending.extend_from_slice(&chunk);
            if prompt.is_match(&String::from_utf8_lossy(&self.pending)) {
                self.pending.clear();
                return true;
            }
            if self.pending.len() > PROMPT_SEARCH_LIMIT {
                let excess = self.pending.len() - PROMPT_SEARCH_LIMIT;
                self.pending.drain(..excess);
            }
        }
        self.stream_open = false;
        false
    }

    /// Write the credential and a line terminator, exactly once.
    async fn send_line(&mut self, credential: &Credential) -> Result<(), DriverError> {
        if self.credential_sent {
            return Ok(());
        }
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| DriverError::Io("pty writer unavailable".to_string()))?;
        let mut line = Zeroizing::new(Vec::with_capacity(credential.expose().len() + 1));
        line.extend_from_slice(credential.expose().as_bytes());
        line.push(b'\n');

        let (writer, result) = tokio::task::spawn_blocking(move || {
            let result = writer.write_all(&line).and_then(|()| writer.flush());
            (writer, result)
        })
        .await
        .map_err(|e| DriverError::Io(format!("pty writer task failed: {e}")))?;
        self.writer = Some(writer);
        self.credential_sent = true;
        result.map_err(|e| DriverError::Io(format!("failed to write credential: {e}")))
    }

    /// Read output while waiting for the child to exit, then kill whatever
    /// is left of its process group.
    async fn drain(&mut self) -> Result<portable_pty::ExitStatus, DriverError> {
        let Self {
            output,
            exit,
            transcript,
            stream_open,
            guard,
            ..
        } = self;
        let waiter = exit
            .as_mut()
            .ok_or_else(|| DriverError::Io("child already reaped".to_string()))?;

        let joined = loop {
            tokio::select! {
                chunk = output.recv(), if *stream_open => match chunk {
                    Some(chunk) => transcript.push(&chunk),
                    None => *stream_open = false,
                },
                joined = &mut *waiter => break joined,
            }
        };
        *exit = None;
        // Background jobs still hold the slave open; killing them ends the
        // stream and lets the reader thread finish.
        guard.kill();

        joined
            .map_err(|e| DriverError::Io(format!("child wait task failed: {e}")))?
            .map_err(|e| DriverError::Io(format!("failed to wait for child: {e}")))
    }

    /// Read output still buffered after the child exited, for at most
    /// `TAIL_GRACE`. A process that left the group may keep the stream open.
    async fn collect_tail(&mut self) {
        if !self.stream_open {
            return;
        }
        let Self {
            output,
            transcript,
            stream_open,
            pid,
            ..
        } = self;
        let closed = tokio::time::timeout(TAIL_GRACE, async {
            while let Some(chunk) = output.recv().await {
                transcript.push(&chunk);
            }
        })
        .await;
        if closed.is_ok() {
            *stream_open = false;
        } else {
            debug!(pid = *pid, "output still open after exit; tail cut short");
        }
    }

    /// Kill the process group and give the waiter a moment to reap it.
    async fn terminate(&mut self) {
        self.guard.kill();
        if let Some(waiter) = self.exit.take() {
            if tokio::time::timeout(REAP_GRACE, waiter).await.is_err() {
                warn!(pid = self.pid, "killed child was not reaped in time");
            }
        }
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO once the last slave fd closes: that is end of stream.
            Err(e) => {
                trace!(error = %e, "pty read ended");
                break;
            }
        }
    }
}

/// Kills the child's process group, at the latest on drop.
///
/// portable-pty makes the child a session leader, so its pid is also its
/// process-group id.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        let pgid = pid
            .and_then(|p| i32::try_from(p).ok())
            .map(Pid::from_raw);
        Self { pgid }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pgid.as_raw(), "killed step process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "failed to kill step process group"),
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Bounded tail of the terminal output with the secret already removed.
///
/// The secret is replaced before the buffer is cut, so the cut can never
/// leave a fragment of it at the front.
struct Transcript {
    bytes: Vec<u8>,
    limit: usize,
    secret: Option<Credential>,
}

impl Transcript {
    fn new(limit: usize, secret: Option<Credential>) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            secret: secret.filter(|c| !c.is_empty()),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let scanned = self.bytes.len();
        self.bytes.extend_from_slice(chunk);
        self.redact_from(scanned);
        if self.bytes.len() > self.limit {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
        }
    }

    /// Replace every occurrence of the secret that ends after `scanned`.
    fn redact_from(&mut self, scanned: usize) {
        let Some(secret) = &self.secret else {
            return;
        };
        let needle = secret.expose().as_bytes();
        let start = scanned.saturating_sub(needle.len() - 1);
        if !self.bytes[start..].windows(needle.len()).any(|w| w == needle) {
            return;
        }

        let mut redacted = Vec::with_capacity(self.bytes.len());
        redacted.extend_from_slice(&self.bytes[..start]);
        let mut i = start;
        while i < self.bytes.len() {
            if self.bytes[i..].starts_with(needle) {
                redacted.extend_from_slice(REDACTED);
                i += needle.len();
            } else {
                redacted.push(self.bytes[i]);
                i += 1;
            }
        }
        self.bytes.zeroize();
        self.bytes = redacted;
    }

    fn render(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}
