//! Lifecycle of an analysis request: validation, creation, the detached
//! completion pass and per-user listing.

use kai_contracts::{
    ANALYZE_REQUEST_COLLECTION, AnalysisRecord, RequestStatus, TEXT_MAX_CHARS, TEXT_MIN_CHARS,
    timestamp_now,
};
use kai_store::{Direction, Document, DocumentStore, Fields, Query, StoreError};
use serde::Serialize;
use serde_json::Value;

mod completion;
mod process;
mod tasks;

pub use completion::{
    ANALYSIS_INSTRUCTION, ANALYSIS_SCHEMA_NAME, CompletionClient, CompletionError,
    CompletionRequest, OpenAiCompletionClient, OpenAiConfig,
};
pub use process::{ProcessOutcome, process};
pub use tasks::{BackgroundTasks, BoxTask, TokioBackgroundTasks};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Text cannot be empty")]
    EmptyText,
    #[error("Text too short for meaningful analysis")]
    TextTooShort,
    #[error("Text must be at most 10000 characters")]
    TextTooLong,
    #[error("limit must be between 1 and 100")]
    LimitOutOfRange,
    #[error("offset must be a non-negative integer")]
    OffsetOutOfRange,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("analysis store error: {0}")]
    Store(#[from] StoreError),
    #[error("stored analysis request {id} is malformed: {reason}")]
    MalformedRecord { id: String, reason: String },
}

/// Trims `raw` and checks its length in characters. Returns the trimmed text.
pub fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let text = raw.trim();
    let chars = text.chars().count();

    if chars == 0 {
        return Err(ValidationError::EmptyText);
    }
    if chars < TEXT_MIN_CHARS {
        return Err(ValidationError::TextTooShort);
    }
    if chars > TEXT_MAX_CHARS {
        return Err(ValidationError::TextTooLong);
    }

    Ok(text.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedAnalysis {
    pub document_id: String,
    pub text: String,
    pub status: RequestStatus,
}

/// Validates `text` and persists a new `pending` request owned by `user_id`.
///
/// No analysis work happens here; callers hand the returned id to [`process`].
pub async fn submit(
    store: &dyn DocumentStore,
    user_id: &str,
    text: &str,
) -> Result<SubmittedAnalysis, AnalysisError> {
    let text = validate_text(text)?;
    let now = timestamp_now();

    let mut fields = Fields::new();
    fields.insert("user_id".to_string(), Value::from(user_id));
    fields.insert("text".to_string(), Value::from(text.as_str()));
    fields.insert(
        "status".to_string(),
        Value::from(RequestStatus::Pending.as_str()),
    );
    fields.insert("created_at".to_string(), Value::from(now.as_str()));
    fields.insert("updated_at".to_string(), Value::from(now));

    let document_id = store.add(ANALYZE_REQUEST_COLLECTION, fields).await?;
    tracing::info!(document_id = %document_id, user_id, "analysis request created");

    Ok(SubmittedAnalysis {
        document_id,
        text,
        status: RequestStatus::Pending,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Result<Self, ValidationError> {
        let limit = match limit {
            None => DEFAULT_PAGE_LIMIT,
            Some(limit) => u32::try_from(limit)
                .ok()
                .filter(|limit| (1..=MAX_PAGE_LIMIT).contains(limit))
                .ok_or(ValidationError::LimitOutOfRange)?,
        };
        let offset = match offset {
            None => 0,
            Some(offset) => u32::try_from(offset).map_err(|_| ValidationError::OffsetOutOfRange)?,
        };

        Ok(Self { limit, offset })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPage {
    pub requests: Vec<AnalysisRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Newest-first page of `user_id`'s requests; `total` ignores pagination.
pub async fn list(
    store: &dyn DocumentStore,
    user_id: &str,
    page: Page,
) -> Result<AnalysisPage, AnalysisError> {
    let query = Query::collection(ANALYZE_REQUEST_COLLECTION)
        .where_eq("user_id", user_id)
        .order_by("created_at", Direction::Descending)
        .limit(page.limit)
        .offset(page.offset);

    let documents = store.query(&query).await?;
    let total = store.count(ANALYZE_REQUEST_COLLECTION, &query.filters).await?;

    let requests = documents
        .into_iter()
        .map(record_from_document)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AnalysisPage {
        requests,
        total,
        limit: page.limit,
        offset: page.offset,
    })
}

fn record_from_document(document: Document) -> Result<AnalysisRecord, AnalysisError> {
    let Document { id, mut fields } = document;
    fields.insert("id".to_string(), Value::from(id.as_str()));

    serde_json::from_value(Value::Object(fields)).map_err(|err| AnalysisError::MalformedRecord {
        id,
        reason: err.to_string(),
    })
}
