use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, put},
    Extension, Json, Router,
};
use shared_types::{FailureKind, HealthStatus, FAILURE_HEADER};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{auth::AuthenticatedUser, digest::sha256_hex, middleware, settings::FileSettings, AppState};

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let authenticated = Router::new()
        .route("/actions", get(list_actions))
        .route("/{action}", put(sign))
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::require_basic_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authenticated)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /actions: actions the caller may use
pub async fn list_actions(
    Extension(user): Extension<AuthenticatedUser>,
    Extension(settings): Extension<Arc<FileSettings>>,
) -> Response {
    match settings.user(&user.name) {
        Some(entry) => Json(settings.summaries_for(entry)).into_response(),
        None => middleware::unauthorized(),
    }
}

/// PUT /{action}: sign the request body
pub async fn sign(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    Extension(settings): Extension<Arc<FileSettings>>,
    body: Bytes,
) -> Response {
    if !settings.has_action(&action) {
        return not_found().await;
    }
    let allowed = settings
        .user(&user.name)
        .is_some_and(|entry| entry.may_use(&action));
    if !allowed {
        warn!(%action, user = %user.name, "action not granted");
        return StatusCode::FORBIDDEN.into_response();
    }

    info!(
        %action,
        user = %user.name,
        bytes = body.len(),
        sha256 = %sha256_hex(&body),
        "upload received"
    );

    match state.signer.process(&action, &body).await {
        Ok(signed) => {
            info!(
                %action,
                user = %user.name,
                bytes = signed.len(),
                sha256 = %sha256_hex(&signed),
                "signed output"
            );
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                signed,
            )
                .into_response()
        }
        Err(e) => failure(e.kind()),
    }
}

/// Empty-bodied 404 for every unmatched route.
pub async fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn failure(kind: FailureKind) -> Response {
    let status = match kind {
        FailureKind::UnknownAction => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, [(FAILURE_HEADER, kind.as_str())]).into_response()
}
