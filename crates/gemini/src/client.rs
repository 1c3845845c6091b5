use crate::types::{ErrorResponse, GenerateContentRequest, GenerateContentResponse};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;

mod config;

pub use config::{Config, ConfigBuilder};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// A thin client for the `generateContent` endpoint.
pub struct Client {
    http: reqwest::Client,
    config: Config,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url(),
            self.config.model()
        )
    }

    pub async fn generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        tracing::debug!(
            "generateContent on {} with {} contents",
            self.config.model(),
            request.contents.len()
        );

        let response = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.config.api_key().expose_secret())
            .json(request)
            .send()
            .await
            .context("Failed to send generateContent request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read generateContent response")?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(anyhow::anyhow!("{}: {}", status, message));
        }

        serde_json::from_str(&body).context("Failed to parse generateContent response")
    }

    /// Runs `request` and returns the reply text, failing when there is none.
    pub async fn generate_text(&self, request: &GenerateContentRequest) -> Result<String> {
        let response = self.generate_content(request).await?;
        if let Some(text) = response.text() {
            return Ok(text);
        }
        match response.block_reason() {
            Some(reason) => Err(anyhow::anyhow!("the prompt was blocked ({reason})")),
            None => Err(anyhow::anyhow!("the model returned no text")),
        }
    }
}
