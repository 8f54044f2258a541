use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use kai_analysis::Page;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::auth_gate::AuthedUser;
use super::envelope::{ApiError, success_response};

#[derive(Debug, Serialize)]
struct UserProfile {
    uid: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnalyzeBody {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListParams {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

pub(super) async fn me(AuthedUser(identity): AuthedUser) -> Result<Response, ApiError> {
    Ok(success_response(
        UserProfile {
            uid: identity.user_id,
            name: identity.name,
            email: identity.email,
        },
        "User profile retrieved successfully",
        StatusCode::OK,
    ))
}

/// Creates a `pending` request and schedules its analysis after the record exists.
pub(super) async fn submit_analysis(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        ApiError::validation("Invalid request body").with_error(rejection.body_text())
    })?;

    let submitted =
        kai_analysis::submit(state.store.as_ref(), &identity.user_id, &body.text).await?;

    let store = state.store.clone();
    let completion = state.completion.clone();
    let document_id = submitted.document_id.clone();
    let text = submitted.text.clone();
    state.tasks.spawn(Box::pin(async move {
        let outcome =
            kai_analysis::process(store.as_ref(), completion.as_ref(), &document_id, &text).await;
        crate::metrics::observe_analysis_outcome(outcome.as_str());
    }));

    Ok(success_response(
        submitted,
        "Analysis request created successfully",
        StatusCode::OK,
    ))
}

pub(super) async fn list_analyses(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|rejection| {
        ApiError::validation("Invalid query parameters").with_error(rejection.body_text())
    })?;

    let page = Page::new(params.limit, params.offset)
        .map_err(|err| ApiError::validation(err.to_string()))?;

    let listed = kai_analysis::list(state.store.as_ref(), &identity.user_id, page).await?;

    Ok(success_response(
        listed,
        "Analysis requests retrieved successfully",
        StatusCode::OK,
    ))
}
