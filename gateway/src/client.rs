//! Client that uploads build artifacts to a running gateway and stores the
//! signed results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{header, StatusCode};
use shared_types::FAILURE_HEADER;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("output directory {0} is a file")]
    OutputDirIsFile(PathBuf),

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} has no file name")]
    NoFileName(PathBuf),

    #[error("request for {file} failed: {source}")]
    Http {
        file: PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("signing {file} failed with {status}{}", failure_suffix(.failure))]
    Rejected {
        file: PathBuf,
        status: StatusCode,
        failure: Option<String>,
    },
}

fn failure_suffix(failure: &Option<String>) -> String {
    failure
        .as_deref()
        .map(|kind| format!(" ({kind})"))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Base URL of the gateway, e.g. `http://127.0.0.1:4567`
    pub endpoint: String,
    pub action: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

pub struct UploadClient {
    http: reqwest::Client,
    options: UploadOptions,
}

impl UploadClient {
    pub fn new(options: UploadOptions) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(options.timeout).build()?;
        Ok(Self { http, options })
    }

    fn url(&self) -> String {
        format!(
            "{}/{}",
            self.options.endpoint.trim_end_matches('/'),
            self.options.action
        )
    }

    /// Sign every file, writing results into the output directory.
    ///
    /// Returns the written paths. Stops at the first failure.
    pub async fn run(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>, UploadError> {
        if files.is_empty() {
            info!("No files to sign");
            return Ok(Vec::new());
        }
        let has_username = self
            .options
            .username
            .as_deref()
            .is_some_and(|u| !u.is_empty());
        let has_password = self
            .options
            .password
            .as_deref()
            .is_some_and(|p| !p.is_empty());
        if has_username && !has_password {
            warn!("username set but password is empty; skipping signing");
            return Ok(Vec::new());
        }

        self.prepare_output_dir().await?;

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            written.push(self.sign_file(file).await?);
        }
        Ok(written)
    }

    async fn prepare_output_dir(&self) -> Result<(), UploadError> {
        let dir = &self.options.output_dir;
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(UploadError::OutputDirIsFile(dir.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| UploadError::Io {
                    op: "create",
                    path: dir.clone(),
                    source,
                }),
            Err(source) => Err(UploadError::Io {
                op: "stat",
                path: dir.clone(),
                source,
            }),
        }
    }

    pub async fn sign_file(&self, file: &Path) -> Result<PathBuf, UploadError> {
        let name = file
            .file_name()
            .ok_or_else(|| UploadError::NoFileName(file.to_path_buf()))?;
        let target = self.options.output_dir.join(name);

        let body = tokio::fs::read(file).await.map_err(|source| UploadError::Io {
            op: "read",
            path: file.to_path_buf(),
            source,
        })?;
        info!(file = %file.display(), bytes = body.len(), action = %self.options.action, "uploading");

        let mut request = self
            .http
            .put(self.url())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(username) = self.options.username.as_deref().filter(|u| !u.is_empty()) {
            request = request.basic_auth(username, self.options.password.as_deref());
        }

        let http_err = |source| UploadError::Http {
            file: file.to_path_buf(),
            source,
        };
        let response = request.send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            let failure = response
                .headers()
                .get(FAILURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(UploadError::Rejected {
                file: file.to_path_buf(),
                status,
                failure,
            });
        }
        let signed = response.bytes().await.map_err(http_err)?;

        tokio::fs::write(&target, &signed)
            .await
            .map_err(|source| UploadError::Io {
                op: "write",
                path: target.clone(),
                source,
            })?;
        info!(file = %file.display(), output = %target.display(), bytes = signed.len(), "signed");
        Ok(target)
    }
}
