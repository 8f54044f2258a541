use std::fmt;

use async_trait::async_trait;
use kai_contracts::Sentiment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ANALYSIS_INSTRUCTION: &str = "Extract summary and sentiment and keywords from text";
pub const ANALYSIS_SCHEMA_NAME: &str = "text_analysis";

const ERROR_BODY_EXCERPT_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response is not valid JSON: {0}")]
    InvalidResponse(String),
    #[error("completion response carried no message content")]
    MissingContent,
}

/// A single structured-output request: a system instruction, the user input and
/// the JSON schema the answer is expected to follow.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub instruction: String,
    pub input: String,
    pub schema_name: String,
    pub schema: Value,
}

impl CompletionRequest {
    pub fn text_analysis(text: &str) -> Self {
        let sentiments = Sentiment::ALL
            .iter()
            .map(|sentiment| sentiment.as_str())
            .collect::<Vec<_>>();

        Self {
            instruction: ANALYSIS_INSTRUCTION.to_string(),
            input: text.to_string(),
            schema_name: ANALYSIS_SCHEMA_NAME.to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "sentiment": {"type": "string", "enum": sentiments},
                    "keywords": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["summary", "sentiment", "keywords"],
            }),
        }
    }
}

/// Returns the model's raw text answer; interpreting it is the caller's job.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a Value,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat<'a>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI-compatible endpoints.
///
/// The underlying HTTP client has no request timeout; a hung upstream leaves
/// the caller waiting.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiCompletionClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.input,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &request.schema_name,
                    schema: &request.schema,
                },
            },
        };

        tracing::debug!(
            model = %self.config.model,
            input_chars = request.input.chars().count(),
            "completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_EXCERPT_CHARS).collect(),
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|err| CompletionError::InvalidResponse(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::MissingContent)
    }
}
