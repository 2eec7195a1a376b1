//! Chat completions client for OpenAI-compatible endpoints.

use crate::models::{ApiConfig, ApiError, PrefgenError, Result, RetryPolicy, capped_delay};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Model that answered (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD
    pub cost_usd: f64,
    /// Request duration, including retries
    pub duration: Duration,
}

/// Client for `POST {base_url}/chat/completions`.
///
/// Each call is retried under the injected [`RetryPolicy`]: network
/// errors, timeouts, 429 and 5xx responses are retried; 401 and 404 fail
/// immediately. A 429 waits for `retry-after` when the server sends it.
///
/// Token usage is accumulated across calls, and priced when per-1M token
/// prices are set with [`ChatClient::with_pricing`].
pub struct ChatClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    requests: AtomicU64,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
    // Microdollars, so the total can live in an atomic
    total_cost_micros: AtomicU64,
}

impl ChatClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PrefgenError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            retry,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            input_price_per_1m: 0.0,
            output_price_per_1m: 0.0,
            total_cost_micros: AtomicU64::new(0),
        })
    }

    /// Set USD prices per 1M input and output tokens.
    pub fn with_pricing(mut self, input_price_per_1m: f64, output_price_per_1m: f64) -> Self {
        self.input_price_per_1m = input_price_per_1m;
        self.output_price_per_1m = output_price_per_1m;
        self
    }

    /// Build a client from the `[api]` config section and a resolved key.
    pub fn from_config(config: &ApiConfig, api_key: String) -> Result<Self> {
        Self::new(
            Some(api_key),
            config.base_url.clone(),
            config.timeout_secs,
            config.retry.clone(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                PrefgenError::Configuration("API key contains invalid header characters".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Run one chat completion, retrying per policy.
    pub async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<CompletionResponse> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error: Option<PrefgenError> = None;

        for attempt in 1..=max_attempts {
            self.requests.fetch_add(1, Ordering::Relaxed);

            let error = match self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
                .await
            {
                Err(e) if e.is_timeout() => PrefgenError::Timeout(self.timeout),
                Err(e) => PrefgenError::Network(e),
                Ok(response) if response.status().is_success() => {
                    return self.parse_success(response, model, start).await;
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 429 {
                        PrefgenError::RateLimited {
                            retry_after_secs: parse_retry_after(response.headers())
                                .unwrap_or_else(|| {
                                    self.retry.delay_after(attempt).as_secs_f64()
                                }),
                        }
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        PrefgenError::Api(classify_status(status, &body, model))
                    }
                }
            };

            if !error.is_retryable() {
                warn!(error = %error, "Request failed, not retrying");
                return Err(error);
            }

            if attempt < max_attempts {
                let delay = error
                    .retry_after()
                    .map(capped_delay)
                    .unwrap_or_else(|| self.retry.delay_after(attempt));
                debug!(
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %error,
                    "Retrying chat completion"
                );
                tokio::time::sleep(delay).await;
            }
            last_error = Some(error);
        }

        Err(PrefgenError::Api(ApiError::MaxRetriesExceeded {
            attempts: max_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        }))
    }

    async fn parse_success(
        &self,
        response: reqwest::Response,
        model: &str,
        start: Instant,
    ) -> Result<CompletionResponse> {
        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PrefgenError::ParseError(format!("Failed to parse response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PrefgenError::ParseError("No content in response".to_string()))?;

        let usage = body.usage.unwrap_or_default();
        let cost = self.calculate_cost(usage.prompt_tokens, usage.completion_tokens);
        self.total_input_tokens
            .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        self.total_cost_micros
            .fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);

        Ok(CompletionResponse {
            content,
            model: body.model.unwrap_or_else(|| model.to_string()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost_usd: cost,
            duration: start.elapsed(),
        })
    }

    /// Total `(input, output)` tokens across all calls.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    /// Cost of one request at the configured prices.
    fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_price_per_1m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_price_per_1m;
        input_cost + output_cost
    }

    /// Total estimated cost in USD across all calls.
    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// HTTP requests sent, retries included.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

fn classify_status(status: u16, body: &str, model: &str) -> ApiError {
    match status {
        401 => ApiError::AuthenticationFailed,
        404 => ApiError::ModelNotFound(model.to_string()),
        _ => {
            let message = serde_json::from_str::<ApiErrorResponse>(body)
                .map(|r| r.error.message)
                .unwrap_or_else(|_| body.to_string());
            ApiError::Status { status, message }
        }
    }
}
