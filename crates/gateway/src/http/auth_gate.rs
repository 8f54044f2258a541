use axum::extract::{FromRequestParts, Request, State};
use axum::http::Method;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use kai_auth::{UserIdentity, bearer_token};
use kai_contracts::envelope::ErrorKind;

use super::AppState;
use super::envelope::ApiError;

const PUBLIC_PATHS: &[&str] = &["/", "/health", "/docs", "/openapi.json"];

fn is_public(path: &str, metrics_require_auth: bool) -> bool {
    PUBLIC_PATHS.contains(&path) || (path == "/metrics" && !metrics_require_auth)
}

/// Verifies the bearer token of every non-public request and attaches the
/// resulting [`UserIdentity`] to the request extensions.
pub(super) async fn auth_gate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    if req.method() == Method::OPTIONS || is_public(&path, state.config.metrics_require_auth) {
        return next.run(req).await;
    }

    let token = match bearer_token(req.headers()) {
        Ok(token) => token,
        Err(err) => {
            tracing::warn!(
                path = %path,
                code = err.code,
                "auth rejected: bad authorization header"
            );
            crate::metrics::observe_auth_decision("rejected");
            return ApiError::unauthorized("Invalid authorization header").into_response();
        }
    };

    let identity = match state.verifier.verify(&token).await {
        Ok(claims) => UserIdentity::from_claims(&claims),
        Err(err) => Err(err),
    };

    match identity {
        Ok(identity) => {
            tracing::info!(path = %path, user_id = %identity.user_id, "auth allowed");
            crate::metrics::observe_auth_decision("allowed");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) if err.is_credential_failure() => {
            tracing::warn!(path = %path, reason = %err.message, "auth rejected: invalid token");
            crate::metrics::observe_auth_decision("rejected");
            ApiError::unauthorized("Invalid or expired token").into_response()
        }
        Err(err) => {
            tracing::error!(path = %path, code = err.code, error = %err.message, "auth failed");
            crate::metrics::observe_auth_decision("error");
            ApiError::new(ErrorKind::Internal, "Authentication failed").into_response()
        }
    }
}

/// Identity placed in the request extensions by [`auth_gate`].
pub(super) struct AuthedUser(pub(super) UserIdentity);

impl<S: Send + Sync> FromRequestParts<S> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserIdentity>()
            .cloned()
            .map(AuthedUser)
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header"))
    }
}
