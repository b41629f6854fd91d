//! Per-request ephemeral files.
//!
//! A [`Workspace`] is a private directory `signbox-<uuid>/` holding the input,
//! output and intermediate files of exactly one signing request. It is also
//! the working directory of every step, so side files a tool writes next to
//! itself stay inside it. The directory is removed when the request ends:
//! explicitly via [`Workspace::cleanup`], or by `Drop` if the request future
//! was cancelled.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const DIR_PREFIX: &str = "signbox";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace {op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("expected output was never produced at {0}")]
    OutputMissing(PathBuf),
}

impl WorkspaceError {
    fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Allocates workspaces under a root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Manager rooted at the system temp directory.
    pub fn temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the private directory of a new request. No file is written.
    pub fn allocate(&self) -> Result<Workspace, WorkspaceError> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(format!("{DIR_PREFIX}-{id}"));

        let mut builder = std::fs::DirBuilder::new();
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
        builder
            .create(&dir)
            .map_err(|e| WorkspaceError::io("create dir", &dir, e))?;

        debug!(workspace = %id, dir = %dir.display(), "workspace allocated");
        Ok(Workspace {
            input: dir.join("in"),
            output: dir.join("out"),
            id,
            dir,
            intermediates: Vec::new(),
            cleaned: false,
        })
    }
}

impl Default for WorkspaceManager {
    fn default() -> Self {
        Self::temp()
    }
}

/// The ephemeral files of one request.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    input: PathBuf,
    output: PathBuf,
    /// (name, path) in registration order
    intermediates: Vec<(String, PathBuf)>,
    cleaned: bool,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory the workspace files live in; also the child's working dir.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Register a tool side-file under `name` and return its path.
    ///
    /// Registering the same name twice returns the same path.
    pub fn register_intermediate(&mut self, name: &str) -> PathBuf {
        if let Some(path) = self.intermediate(name) {
            return path.to_path_buf();
        }
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let path = self.dir.join(format!("tmp-{safe}"));
        self.intermediates.push((name.to_string(), path.clone()));
        path
    }

    pub fn intermediate(&self, name: &str) -> Option<&Path> {
        self.intermediates
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_path())
    }

    pub fn intermediate_paths(&self) -> impl Iterator<Item = &Path> {
        self.intermediates.iter().map(|(_, p)| p.as_path())
    }

    /// Every path this workspace owns: input, output, then intermediates.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.input.clone(), self.output.clone()];
        paths.extend(self.intermediates.iter().map(|(_, p)| p.clone()));
        paths
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }

    /// Persist the uploaded payload to the input path.
    ///
    /// The file must not exist yet; on unix it is created with mode 0600.
    pub async fn write_input(&self, bytes: &[u8]) -> Result<(), WorkspaceError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&self.input)
            .await
            .map_err(|e| WorkspaceError::io("create input", &self.input, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| WorkspaceError::io("write input", &self.input, e))?;
        file.sync_all()
            .await
            .map_err(|e| WorkspaceError::io("sync input", &self.input, e))?;
        Ok(())
    }

    /// Read the signed artifact from the output path.
    pub async fn read_output(&self) -> Result<Vec<u8>, WorkspaceError> {
        match tokio::fs::read(&self.output).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(WorkspaceError::OutputMissing(self.output.clone()))
            }
            Err(e) => Err(WorkspaceError::io("read output", &self.output, e)),
        }
    }

    /// Delete the workspace directory with everything in it, registered or
    /// not. An absent directory is fine; runs at most once.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        let removed = tokio::fs::remove_dir_all(&self.dir).await;
        self.report_removal(removed);
    }

    fn cleanup_blocking(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        let removed = std::fs::remove_dir_all(&self.dir);
        self.report_removal(removed);
    }

    fn report_removal(&self, removed: std::io::Result<()>) {
        match removed {
            Ok(()) => debug!(workspace = %self.id, "workspace removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(workspace = %self.id, dir = %self.dir.display(), error = %e, "failed to remove workspace")
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.cleaned {
            debug!(workspace = %self.id, "workspace dropped before cleanup; removing files");
            self.cleanup_blocking();
        }
    }
}
