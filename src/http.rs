//! JSON POST with exponential backoff, shared by the remote embedding
//! providers and the LLM client.
//!
//! - HTTP 429 and 5xx → retry
//! - other non-success statuses → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PostError {
    /// The server answered with a status that is not worth retrying, or
    /// kept answering 429/5xx until retries ran out.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// A success response whose body is not JSON.
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// POST `body` to `url`, retrying transient failures up to `max_retries`
/// times, and return the decoded JSON response.
pub async fn post_json_with_retry(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
) -> Result<Value, PostError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff(attempt)).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| PostError::Decode(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = PostError::Status {
                    status: status.as_u16(),
                    body: body_text,
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(%url, attempt, status = status.as_u16(), "retryable HTTP error");
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                warn!(%url, attempt, error = %e, "request failed");
                last_err = Some(PostError::Transport(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| PostError::Transport("request failed after retries".into())))
}
