#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use signbox_gateway::{api, auth, settings::SettingsStore, AppState};
use signer::SignerOptions;

pub const ACTION_SECRET: &str = "tool-pass";
pub const CI_PASSWORD: &str = "ci-pass";
pub const ADMIN_PASSWORD: &str = "admin-pass";

pub struct TestApp {
    pub router: Router,
    pub dir: tempfile::TempDir,
}

/// Router over a config with a prompting stub tool (`stub`), a failing
/// chain (`broken`) and the `gpg` preset. `ci` may only use `stub`.
pub fn setup(max_upload_bytes: usize) -> TestApp {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let work = dir.path().join("work");
    std::fs::create_dir(&work).expect("failed to create work dir");

    let tool = dir.path().join("stub-sign.sh");
    std::fs::write(
        &tool,
        format!(
            r#"read -r -s -p "Enter passphrase: " pw
echo
[ "$pw" = "{ACTION_SECRET}" ] || exit 2
printf 'signed:' > "$2"
cat "$1" >> "$2"
"#
        ),
    )
    .expect("failed to write stub tool");

    let ci_hash = auth::hash_password(CI_PASSWORD).expect("hash");
    let admin_hash = auth::hash_password(ADMIN_PASSWORD).expect("hash");
    let config = dir.path().join("config.yml");
    std::fs::write(
        &config,
        format!(
            r#"timeout_seconds: 20
prompt_window_seconds: 5
users:
  ci:
    password_hash: "{ci_hash}"
    actions: [stub]
  admin:
    password_hash: "{admin_hash}"
actions:
  stub:
    password: "{ACTION_SECRET}"
    prompt: "Enter passphrase:"
    vars:
      tool: "{tool}"
    steps:
      - command: "bash {{tool}} {{input}} {{output}}"
        requires_auth: true
  broken:
    password: unused
    prompt: "never"
    steps:
      - command: "exit 3"
  gpg:
    password: unused
"#,
            tool = tool.display()
        ),
    )
    .expect("failed to write config");

    let state = Arc::new(AppState::new(
        SettingsStore::new(config),
        SignerOptions {
            workspace_root: work,
            prompt_window: Duration::from_secs(5),
            ..SignerOptions::default()
        },
    ));
    TestApp {
        router: api::router(state, max_upload_bytes),
        dir,
    }
}

pub fn basic(user: &str, password: &str) -> String {
    auth::BasicCredentials::header_value(user, password)
}
