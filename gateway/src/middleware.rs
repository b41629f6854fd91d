use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use shared_types::{FailureKind, FAILURE_HEADER};
use tracing::{error, warn};

use crate::{
    auth::{self, REALM},
    AppState,
};

/// Middleware: require valid basic credentials for a configured user.
///
/// Loads the settings file once for the request and hands both the settings
/// and the [`auth::AuthenticatedUser`] to the handler as extensions.
pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let settings = match state.settings.load().await {
        Ok(settings) => settings,
        Err(e) => {
            error!(path = %state.settings.path().display(), "configuration unusable: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(FAILURE_HEADER, FailureKind::Configuration.as_str())],
            )
                .into_response();
        }
    };

    match auth::authenticate(&settings, req.headers()) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            req.extensions_mut().insert(Arc::new(settings));
            next.run(req).await
        }
        Err(e) => {
            warn!(path = %req.uri().path(), "authentication failed: {e}");
            unauthorized()
        }
    }
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{REALM}\""))],
    )
        .into_response()
}
