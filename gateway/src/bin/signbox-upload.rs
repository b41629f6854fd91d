//! Upload artifacts to a signbox gateway and save the signed results.
//!
//! Usage:
//!   signbox-upload --action codesign --username ci target/release/app.exe
//!
//! Environment variables:
//!   SIGNBOX_ENDPOINT - gateway base URL (default: http://127.0.0.1:4567)
//!   SIGNBOX_USERNAME / SIGNBOX_PASSWORD - basic auth credentials

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use signbox_gateway::{
    client::{UploadClient, UploadOptions},
    config::LogFormat,
    init_tracing,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "signbox-upload")]
#[command(about = "Send files to a signbox gateway for signing")]
#[command(version)]
struct Args {
    /// Gateway base URL
    #[arg(long, env = "SIGNBOX_ENDPOINT", default_value = "http://127.0.0.1:4567")]
    endpoint: String,

    /// Signing action to request
    #[arg(long, default_value = "codesign")]
    action: String,

    #[arg(long, env = "SIGNBOX_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "SIGNBOX_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Where signed files are written, under their original names
    #[arg(long, default_value = "signed")]
    output_dir: PathBuf,

    /// Per-file request timeout in seconds
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Files to sign
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Text, "signbox_upload=info,signbox_gateway=info");

    let args = Args::parse();
    let client = UploadClient::new(UploadOptions {
        endpoint: args.endpoint,
        action: args.action,
        username: args.username,
        password: args.password,
        output_dir: args.output_dir,
        timeout: Duration::from_secs(args.timeout_secs),
    })?;

    let written = client.run(&args.files).await?;
    info!(count = written.len(), "done");
    Ok(())
}
