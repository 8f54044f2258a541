use kai_contracts::{ANALYZE_REQUEST_COLLECTION, AnalysisResult, RequestStatus, timestamp_now};
use kai_store::{DocumentStore, Fields, StoreError};
use serde_json::Value;
use tracing::Instrument;

use crate::completion::{CompletionClient, CompletionError, CompletionRequest};

const REQUIRED_RESULT_FIELDS: [&str; 3] = ["summary", "sentiment", "keywords"];

/// How a detached analysis pass ended. Only used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Result written with status `completed`, including the unparsed fallback.
    Completed,
    /// Model output parsed but lacked a required field; written as `failed`.
    Rejected,
    /// Completion or store fault recorded as `failed` with an error message.
    Failed,
    /// The failure itself could not be recorded.
    Abandoned,
}

impl ProcessOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessOutcome::Completed => "completed",
            ProcessOutcome::Rejected => "rejected",
            ProcessOutcome::Failed => "failed",
            ProcessOutcome::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("failed to encode analysis result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Drives one request from `pending` to a terminal status. Never returns an
/// error: faults are written to the record as `failed` or, failing that, logged.
pub async fn process(
    store: &dyn DocumentStore,
    completion: &dyn CompletionClient,
    record_id: &str,
    text: &str,
) -> ProcessOutcome {
    let span = tracing::info_span!("analysis.process", document_id = %record_id);

    async move {
        tracing::info!("analysis started");

        match run(store, completion, record_id, text).await {
            Ok(outcome) => {
                tracing::info!(outcome = outcome.as_str(), "analysis finished");
                outcome
            }
            Err(err) => {
                tracing::error!(error = %err, "analysis failed");
                record_failure(store, record_id, &err).await
            }
        }
    }
    .instrument(span)
    .await
}

async fn run(
    store: &dyn DocumentStore,
    completion: &dyn CompletionClient,
    record_id: &str,
    text: &str,
) -> Result<ProcessOutcome, ProcessError> {
    let mut processing = Fields::new();
    processing.insert(
        "status".to_string(),
        Value::from(RequestStatus::Processing.as_str()),
    );
    processing.insert("updated_at".to_string(), Value::from(timestamp_now()));
    store
        .update(ANALYZE_REQUEST_COLLECTION, record_id, processing)
        .await?;
    tracing::debug!(status = RequestStatus::Processing.as_str(), "status updated");

    let raw = completion
        .complete(CompletionRequest::text_analysis(text))
        .await?;
    tracing::debug!(raw_chars = raw.chars().count(), "completion received");

    let (outcome, result) = interpret(&raw)?;
    let status = match outcome {
        ProcessOutcome::Completed => RequestStatus::Completed,
        _ => RequestStatus::Failed,
    };

    let now = timestamp_now();
    let mut terminal = Fields::new();
    terminal.insert("status".to_string(), Value::from(status.as_str()));
    terminal.insert("result".to_string(), result);
    terminal.insert("updated_at".to_string(), Value::from(now.as_str()));
    terminal.insert("completed_at".to_string(), Value::from(now));
    store
        .update(ANALYZE_REQUEST_COLLECTION, record_id, terminal)
        .await?;

    Ok(outcome)
}

async fn record_failure(
    store: &dyn DocumentStore,
    record_id: &str,
    err: &ProcessError,
) -> ProcessOutcome {
    let mut failed = Fields::new();
    failed.insert(
        "status".to_string(),
        Value::from(RequestStatus::Failed.as_str()),
    );
    failed.insert("error_message".to_string(), Value::from(err.to_string()));
    failed.insert("updated_at".to_string(), Value::from(timestamp_now()));

    match store
        .update(ANALYZE_REQUEST_COLLECTION, record_id, failed)
        .await
    {
        Ok(()) => ProcessOutcome::Failed,
        Err(update_err) => {
            tracing::error!(error = %update_err, "failed to record analysis failure");
            ProcessOutcome::Abandoned
        }
    }
}

/// Maps raw model output to the outcome and the value stored under `result`.
fn interpret(raw: &str) -> Result<(ProcessOutcome, Value), serde_json::Error> {
    let parsed = match serde_json::from_str::<Value>(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::info!(error = %err, "completion output is not JSON; storing fallback");
            let fallback = AnalysisResult::unparsed(raw, err.to_string());
            return Ok((ProcessOutcome::Completed, serde_json::to_value(fallback)?));
        }
    };

    let complete = parsed.as_object().is_some_and(|object| {
        REQUIRED_RESULT_FIELDS
            .iter()
            .all(|field| object.get(*field).is_some_and(is_truthy))
    });

    if complete {
        Ok((ProcessOutcome::Completed, parsed))
    } else {
        tracing::info!("completion output is missing required fields");
        Ok((ProcessOutcome::Rejected, parsed))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
