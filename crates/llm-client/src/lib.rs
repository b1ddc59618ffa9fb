pub mod error;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{LlmError, LlmResult};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for the OpenRouter-backed LLM transport.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub referer: String,
    pub app_title: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            referer: std::env::var("OPENROUTER_REFERER")
                .unwrap_or_else(|_| "https://consortium-trading.invalid".to_string()),
            app_title: std::env::var("OPENROUTER_APP_TITLE")
                .unwrap_or_else(|_| "Consortium Trading".to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    #[allow(dead_code)]
    role: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
}

/// Token usage reported alongside a completion.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single LLM completion.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

/// Thin wrapper around a unified chat-completions endpoint (OpenRouter), giving
/// every trader agent access to whichever model handle it was configured with.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build LLM http client");
        Self { http, config }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }

    fn headers(&self) -> LlmResult<HeaderMap> {
        let api_key = self.config.api_key.as_ref().ok_or(LlmError::NotConfigured)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| LlmError::ApiError { status: 0, body: e.to_string() })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "HTTP-Referer",
            HeaderValue::from_str(&self.config.referer).unwrap_or(HeaderValue::from_static("")),
        );
        headers.insert(
            "X-Title",
            HeaderValue::from_str(&self.config.app_title).unwrap_or(HeaderValue::from_static("")),
        );
        Ok(headers)
    }

    /// Invoke a model through the unified chat-completions transport.
    #[tracing::instrument(skip(self, system_prompt, user_content), fields(model = %model))]
    pub async fn generate_response(
        &self,
        model: &str,
        system_prompt: &str,
        user_content: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> LlmResult<LlmResponse> {
        let payload = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: user_content.to_string() },
            ],
            temperature,
            max_tokens,
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .headers(self.headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(model.to_string())
                } else {
                    LlmError::RequestFailed(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model = %model, status = %status, "openrouter returned an error");
            return Err(LlmError::ApiError { status: status.as_u16(), body });
        }

        let parsed: ChatResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyResponse(model.to_string()))?;

        tracing::info!(
            model = %model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            "llm completion received"
        );

        Ok(LlmResponse {
            content: choice.message.content,
            model: if parsed.model.is_empty() { model.to_string() } else { parsed.model },
            finish_reason: choice.finish_reason,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
        })
    }

    /// Ask the model for a short, honest self-critique of its recent trade history.
    pub async fn generate_autocritique(
        &self,
        model: &str,
        agent_name: &str,
        trade_summary: &str,
        total_fees: f64,
        current_performance_pct: f64,
    ) -> LlmResult<String> {
        let prompt = format!(
            "You are {agent_name}, an AI trader. Review your recent history and critique yourself honestly.\n\n\
             ## RECENT HISTORY\n{trade_summary}\n\n\
             ## METRICS\nFees paid: ${total_fees:.2}\nPerformance: {current_performance_pct:+.2}%\n\n\
             ## QUESTIONS\n\
             1. Am I trading too often? (Every trade costs a fee.)\n\
             2. Am I following the crowd or finding unique opportunities?\n\
             3. Have I missed sell signals?\n\
             4. How can I make MORE profit?\n\
             5. What patterns should I avoid?\n\n\
             Respond with an honest internal monologue, 200 words max."
        );

        let response = self
            .generate_response(
                model,
                "You are an AI trader who evaluates yourself critically and honestly.",
                &prompt,
                0.7,
                500,
            )
            .await?;
        Ok(response.content)
    }
}

/// Scan `text` for the outermost brace-balanced `{...}` substring and parse it as JSON.
///
/// LLMs routinely wrap their structured answer in prose or a fenced code block; this
/// walks the string tracking brace depth (ignoring braces inside string literals) so it
/// finds the true outermost object rather than the first `{` and last `}` in the text.
pub fn extract_json_object(text: &str) -> LlmResult<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        return Ok(value);
    }

    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        let candidate = &text[s..=i];
                        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
                            return Ok(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Err(LlmError::JsonExtractionFailed(text.chars().take(200).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let v = extract_json_object(r#"{"decision":"BUY","confidence":80}"#).unwrap();
        assert_eq!(v["decision"], "BUY");
    }

    #[test]
    fn extracts_json_wrapped_in_prose_and_fences() {
        let text = "Sure, here is my decision:\n```json\n{\"decision\": \"HOLD\", \"confidence\": 40}\n```\nLet me know if you need more.";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["decision"], "HOLD");
        assert_eq!(v["confidence"], 40);
    }

    #[test]
    fn ignores_braces_inside_string_values() {
        let text = r#"noise {"reasoning": "price broke above {resistance}", "decision": "BUY"} trailing"#;
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["decision"], "BUY");
        assert_eq!(v["reasoning"], "price broke above {resistance}");
    }

    #[test]
    fn no_braces_is_an_error() {
        assert!(extract_json_object("no structured content here").is_err());
    }

    #[test]
    fn config_from_env_without_key_is_unconfigured() {
        std::env::remove_var("OPENROUTER_API_KEY");
        let config = LlmConfig::from_env();
        assert!(!config.is_configured());
    }
}
