use std::sync::Arc;

use signbox_gateway::{
    api,
    config::Config,
    init_tracing,
    settings::{FileSettings, SettingsStore},
    AppState,
};
use signer::SignerOptions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(
        config.log_format,
        "signbox_gateway=info,signer=info,tower_http=info",
    );
    info!(port = config.port, "signbox gateway starting");

    // Fail fast on a broken file; it is re-read per request afterwards.
    let settings = SettingsStore::new(config.config_path.clone());
    let initial: FileSettings = settings.load().await?;
    info!(
        path = %settings.path().display(),
        actions = initial.actions.len(),
        users = initial.users.len(),
        "configuration loaded"
    );

    tokio::fs::create_dir_all(&config.workspace_dir).await?;
    let state = Arc::new(AppState::new(
        settings,
        SignerOptions {
            workspace_root: config.workspace_dir.clone(),
            prompt_window: initial.prompt_window(),
            ..SignerOptions::default()
        },
    ));

    let app = api::router(state, config.max_upload_bytes);

    let addr = config.listen_addr();
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
