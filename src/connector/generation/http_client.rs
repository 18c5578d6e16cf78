use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::application::GenerationProvider;
use crate::connector::embedding::{classify_reqwest_error, classify_status};
use crate::domain::DomainError;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Answer generation against a messages-style chat endpoint. Retrieved
/// chunks are passed as a system preamble; the model is told to ground its
/// answer in them and nothing else.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpGenerationClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
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
        })
    }

    fn system_prompt(context: &[String]) -> String {
        let mut prompt = String::from(
            "You answer questions about a codebase. Ground every claim in the \
             code excerpts below and say so when they are insufficient.\n",
        );
        for (i, excerpt) in context.iter().enumerate() {
            prompt.push_str(&format!("\n--- excerpt {} ---\n{}\n", i + 1, excerpt));
        }
        prompt
    }

    async fn request_once(&self, prompt: &str, context: &[String]) -> Result<String, DomainError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: Self::system_prompt(context),
            messages: vec![Message {
                role: "user",
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DomainError::transient(format!("generation response body: {e}")))?;
        let text = parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(DomainError::transient(
                "generation endpoint returned no text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationClient {
    async fn generate(&self, prompt: &str, context: &[String]) -> Result<String, DomainError> {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                debug!("Retrying generation request in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            match self.request_once(prompt, context).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    warn!("Generation attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| DomainError::transient("generation request failed".to_string())))
    }
}
