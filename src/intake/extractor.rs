//! HTTP intent extractor — client for the external classification service.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;

use crate::error::IntakeError;
use crate::intake::types::{ExtractedIntent, InboundEmail, IntentExtractor};

/// Extraction service configuration.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

impl ExtractorConfig {
    /// Build config from environment variables.
    /// Returns `None` if `ORDER_ASSIST_EXTRACTOR_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ORDER_ASSIST_EXTRACTOR_URL").ok()?;
        let api_key = SecretString::from(
            std::env::var("ORDER_ASSIST_EXTRACTOR_API_KEY").unwrap_or_default(),
        );
        let timeout = std::env::var("ORDER_ASSIST_EXTRACTOR_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        Some(Self {
            base_url,
            api_key,
            timeout,
        })
    }
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    sender: &'a str,
    subject: Option<&'a str>,
    body: &'a str,
}

/// Calls the classification service over HTTP.
pub struct HttpIntentExtractor {
    client: reqwest::Client,
    config: ExtractorConfig,
}

impl HttpIntentExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/extract-intent",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl IntentExtractor for HttpIntentExtractor {
    async fn extract(&self, email: &InboundEmail) -> Result<ExtractedIntent, IntakeError> {
        let response = self
            .client
            .post(self.url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&ExtractRequest {
                sender: &email.sender,
                subject: email.subject.as_deref(),
                body: &email.body,
            })
            .send()
            .await
            .map_err(|e| IntakeError::Extraction(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IntakeError::Extraction(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| IntakeError::Extraction(format!("bad extraction payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_cleanly() {
        let extractor = HttpIntentExtractor::new(ExtractorConfig {
            base_url: "https://intent.internal.example/".into(),
            api_key: SecretString::from("k"),
            timeout: Duration::from_secs(5),
        });
        assert_eq!(
            extractor.url(),
            "https://intent.internal.example/v1/extract-intent"
        );
    }
}
