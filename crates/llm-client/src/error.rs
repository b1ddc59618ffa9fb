use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM client not configured: missing API key")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("OpenRouter returned {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("empty response from model {0}")]
    EmptyResponse(String),

    #[error("could not extract a JSON object from the response: {0}")]
    JsonExtractionFailed(String),

    #[error("invalid JSON in model response: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request timed out for model {0}")]
    Timeout(String),
}

pub type LlmResult<T> = Result<T, LlmError>;
