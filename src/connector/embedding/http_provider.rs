use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::application::EmbeddingProvider;
use crate::domain::DomainError;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings over HTTP against an OpenAI-compatible `/embeddings`
/// endpoint. Timeouts and 5xx responses are retried with exponential
/// backoff; 4xx responses are surfaced as permanent input errors so the
/// caller never retries a request that cannot succeed.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::internal(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        })
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DomainError::transient(format!("embedding response body: {e}")))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(DomainError::transient(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                debug!("Retrying embedding request in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    warn!("Embedding attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| DomainError::transient("embedding request failed".to_string())))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

pub(crate) fn classify_reqwest_error(e: reqwest::Error) -> DomainError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        DomainError::transient(format!("embedding endpoint unreachable: {e}"))
    } else {
        DomainError::internal(format!("embedding request: {e}"))
    }
}

pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> DomainError {
    let detail = body.chars().take(200).collect::<String>();
    if status.as_u16() == 429 || status.is_server_error() {
        DomainError::transient(format!("embedding endpoint returned {status}: {detail}"))
    } else {
        DomainError::permanent_input(format!("embedding endpoint rejected request ({status}): {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(reqwest::StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        let err = classify_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY, "bad input");
        assert!(err.is_permanent_input());
    }
}
