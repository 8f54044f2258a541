use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, middleware};
use kai_analysis::{
    BackgroundTasks, CompletionClient, OpenAiCompletionClient, TokioBackgroundTasks,
};
use kai_auth::{FirebaseVerifier, SharedSecretVerifier, TokenVerifier};
use kai_contracts::envelope::{ErrorEnvelope, ErrorKind};
use kai_store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::{AuthMode, GatewayConfig, StartupError, StoreMode};

mod auth_gate;
mod docs;
mod envelope;
mod request_log;
mod user;

use self::envelope::{ApiError, success_response};

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    verifier: Arc<dyn TokenVerifier>,
    store: Arc<dyn DocumentStore>,
    completion: Arc<dyn CompletionClient>,
    tasks: Arc<dyn BackgroundTasks>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn DocumentStore>,
        completion: Arc<dyn CompletionClient>,
        tasks: Arc<dyn BackgroundTasks>,
    ) -> Self {
        Self {
            config,
            verifier,
            store,
            completion,
            tasks,
        }
    }
}

/// Builds every collaborator named by `config` and returns the full application.
pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let verifier: Arc<dyn TokenVerifier> = match config.auth_mode {
        AuthMode::Firebase => {
            let firebase = config.firebase.clone().ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "firebase auth mode requires firebase config".to_string(),
            })?;
            Arc::new(
                FirebaseVerifier::new(firebase)
                    .await
                    .map_err(|err| StartupError {
                        code: err.code,
                        message: err.message,
                    })?,
            )
        }
        AuthMode::Local => {
            let shared_secret = config.shared_secret.clone().ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "local auth mode requires JWT_SECRET_KEY".to_string(),
            })?;
            tracing::warn!("local auth mode: accepting locally signed tokens");
            Arc::new(
                SharedSecretVerifier::new(shared_secret).map_err(|err| StartupError {
                    code: err.code,
                    message: err.message,
                })?,
            )
        }
    };

    let store: Arc<dyn DocumentStore> = match config.store_mode {
        StoreMode::Postgres => {
            let db_url = config.db_url.as_deref().ok_or_else(|| StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key KAI_DB_URL".to_string(),
            })?;
            Arc::new(
                PgDocumentStore::connect_and_migrate(
                    db_url,
                    config.db_name.as_deref(),
                    config.store_write_timeout(),
                )
                .await
                .map_err(|err| StartupError {
                    code: "ERR_STORE_UNAVAILABLE",
                    message: format!("failed to initialize document store: {}", err),
                })?,
            )
        }
        StoreMode::Memory => {
            tracing::warn!("memory store mode: analysis requests are lost on restart");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    let completion: Arc<dyn CompletionClient> = Arc::new(
        OpenAiCompletionClient::new(config.openai.clone()).map_err(|err| StartupError {
            code: "ERR_COMPLETION_CLIENT",
            message: format!("failed to initialize completion client: {}", err),
        })?,
    );

    let state = AppState::new(
        config,
        verifier,
        store,
        completion,
        Arc::new(TokioBackgroundTasks),
    );

    Ok(app(state))
}

/// Routes and middleware over already-built collaborators.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/docs", get(docs::docs))
        .route("/openapi.json", get(docs::openapi))
        .route("/metrics", get(metrics))
        .route("/v1/user/me", get(user::me))
        .route(
            "/v1/user/analyze",
            get(user::list_analyses).post(user::submit_analysis),
        )
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_gate::auth_gate,
        ))
        .layer(middleware::from_fn(request_log::request_metadata))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

#[derive(Debug, Serialize)]
struct ServiceStatus {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'static str>,
}

async fn root() -> Response {
    success_response(
        ServiceStatus {
            status: "healthy",
            service: Some("kai-backend"),
        },
        "Kai Backend API is running",
        StatusCode::OK,
    )
}

async fn health() -> Response {
    success_response(
        ServiceStatus {
            status: "healthy",
            service: None,
        },
        "Service is healthy",
        StatusCode::OK,
    )
}

async fn metrics() -> Response {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to render metrics");
            ApiError::internal().into_response()
        }
    }
}

async fn not_found() -> ApiError {
    ApiError::new(ErrorKind::NotFound, "Not Found")
}

async fn method_not_allowed() -> Response {
    let status = StatusCode::METHOD_NOT_ALLOWED;
    (
        status,
        Json(ErrorEnvelope::new(status.as_u16(), "Method Not Allowed", None)),
    )
        .into_response()
}
