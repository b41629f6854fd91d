//! Upload client against an in-process gateway

mod support;

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use signbox_gateway::client::{UploadClient, UploadError, UploadOptions};
use support::{setup, ADMIN_PASSWORD};

async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    format!("http://{addr}")
}

fn options(endpoint: String, action: &str, output_dir: PathBuf) -> UploadOptions {
    UploadOptions {
        endpoint,
        action: action.to_string(),
        username: Some("admin".to_string()),
        password: Some(ADMIN_PASSWORD.to_string()),
        output_dir,
        timeout: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn test_uploads_files_and_writes_signed_copies() {
    let app = setup(1024 * 1024);
    let endpoint = serve(app.router.clone()).await;
    let inputs = app.dir.path().join("inputs");
    std::fs::create_dir(&inputs).unwrap();
    let a = inputs.join("a.exe");
    let b = inputs.join("b.msi");
    std::fs::write(&a, b"first").unwrap();
    std::fs::write(&b, b"second").unwrap();
    let out = app.dir.path().join("signed");

    let client = UploadClient::new(options(endpoint, "stub", out.clone())).unwrap();
    let written = client.run(&[a, b]).await.unwrap();

    assert_eq!(written, vec![out.join("a.exe"), out.join("b.msi")]);
    assert_eq!(std::fs::read(out.join("a.exe")).unwrap(), b"signed:first");
    assert_eq!(std::fs::read(out.join("b.msi")).unwrap(), b"signed:second");
}

#[tokio::test]
async fn test_server_failure_surfaces_status_and_kind() {
    let app = setup(1024 * 1024);
    let endpoint = serve(app.router.clone()).await;
    let input = app.dir.path().join("a.exe");
    std::fs::write(&input, b"payload").unwrap();

    let client =
        UploadClient::new(options(endpoint, "broken", app.dir.path().join("signed"))).unwrap();
    let err = client.run(&[input]).await.unwrap_err();

    match err {
        UploadError::Rejected { status, failure, .. } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(failure.as_deref(), Some("step_exited_non_zero"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
