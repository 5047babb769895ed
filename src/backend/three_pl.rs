//! Third-party logistics (3PL) backend — synchronous API-driven fulfillment.
//!
//! The 3PL both enforces the time window (shared with the warehouse policy)
//! and knows the live pick state, so eligibility is checked on both axes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::{
    ApplyOutcome, FinalizeOutcome, FulfillmentBackend, classify_http_error, classify_http_status,
};
use crate::config::EligibilityConfig;
use crate::eligibility::{self, EligibilityResult};
use crate::error::BackendError;
use crate::order::{Address, ChangeRequest, FulfillmentMethod, Order, RequestType};
use crate::workflow::model::WorkflowRecord;

/// 3PL API configuration.
#[derive(Debug, Clone)]
pub struct ThreePlConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

impl ThreePlConfig {
    /// Build config from environment variables.
    /// Returns `None` if `ORDER_ASSIST_3PL_BASE_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ORDER_ASSIST_3PL_BASE_URL").ok()?;
        let api_key =
            SecretString::from(std::env::var("ORDER_ASSIST_3PL_API_KEY").unwrap_or_default());
        let timeout = std::env::var("ORDER_ASSIST_3PL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(15));
        Some(Self {
            base_url,
            api_key,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FulfillmentStatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
struct AddressChangeBody<'a> {
    address: &'a Address,
}

#[derive(Debug, Deserialize)]
struct ChangeResponse {
    accepted: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Fulfillment via a third-party logistics provider's API.
pub struct ThreePlBackend {
    client: reqwest::Client,
    config: ThreePlConfig,
    eligibility: EligibilityConfig,
}

impl ThreePlBackend {
    pub fn new(config: ThreePlConfig, eligibility: EligibilityConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            eligibility,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fulfillment_status(&self, order_number: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("orders/{order_number}/fulfillment-status")))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(self.method(), status, body));
        }

        let parsed: FulfillmentStatusResponse = response
            .json()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;
        Ok(parsed.status)
    }

    async fn post_change(
        &self,
        workflow: &WorkflowRecord,
        change: &ChangeRequest,
    ) -> Result<ChangeResponse, BackendError> {
        let request = match change {
            ChangeRequest::Cancel => self
                .client
                .post(self.url(&format!("orders/{}/cancel", workflow.order_number))),
            ChangeRequest::Readdress { new_address } => self
                .client
                .put(self.url(&format!("orders/{}/address", workflow.order_number)))
                .json(&AddressChangeBody {
                    address: new_address,
                }),
        };

        let response = request
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(self.method(), status, body));
        }

        response
            .json()
            .await
            .map_err(|e| classify_http_error(self.method(), e))
    }
}

/// Pick states in which a 3PL order can no longer be modified.
fn is_past_modification(status: &str) -> bool {
    matches!(status, "picked" | "packed" | "shipped" | "delivered")
}

#[async_trait]
impl FulfillmentBackend for ThreePlBackend {
    fn method(&self) -> FulfillmentMethod {
        FulfillmentMethod::ThirdPartyLogisticsApi
    }

    fn requires_external_confirmation(&self) -> bool {
        false
    }

    async fn check_eligibility(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<EligibilityResult, BackendError> {
        let window = eligibility::evaluate(
            order,
            FulfillmentMethod::ThirdPartyLogisticsApi,
            now,
            &self.eligibility,
        );
        if !window.eligible {
            return Ok(window);
        }

        let status = self.fulfillment_status(&order.order_number).await?;
        if is_past_modification(&status) {
            Ok(EligibilityResult::ineligible(format!(
                "the logistics provider reports order {} as already {status}",
                order.order_number,
            )))
        } else {
            Ok(window)
        }
    }

    async fn apply_change(
        &self,
        workflow: &WorkflowRecord,
        change: &ChangeRequest,
    ) -> Result<ApplyOutcome, BackendError> {
        let response = self.post_change(workflow, change).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            order_number = %workflow.order_number,
            accepted = response.accepted,
            "3PL change request completed"
        );
        Ok(ApplyOutcome {
            accepted: response.accepted,
            requires_confirmation: false,
            detail: response.reason,
        })
    }

    async fn finalize(
        &self,
        workflow: &WorkflowRecord,
        _external_reply: Option<&str>,
    ) -> Result<FinalizeOutcome, BackendError> {
        // The mutation already happened synchronously in apply_change; the
        // flags on the record are the source of truth.
        let was_updated = workflow.flags.change_applied;
        Ok(FinalizeOutcome {
            was_updated,
            refund_eligible: was_updated && workflow.request_type == RequestType::Cancellation,
            detail: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_modification_states() {
        for status in ["picked", "packed", "shipped", "delivered"] {
            assert!(is_past_modification(status), "{status}");
        }
        for status in ["pending", "received", "on_hold"] {
            assert!(!is_past_modification(status), "{status}");
        }
    }

    #[test]
    fn url_joins_without_double_slash() {
        let backend = ThreePlBackend::new(
            ThreePlConfig {
                base_url: "https://api.3pl.example/v1/".into(),
                api_key: SecretString::from("key"),
                timeout: Duration::from_secs(5),
            },
            EligibilityConfig::default(),
        );
        assert_eq!(
            backend.url("orders/ORD-1/cancel"),
            "https://api.3pl.example/v1/orders/ORD-1/cancel"
        );
    }

    #[test]
    fn change_response_parses_optional_reason() {
        let parsed: ChangeResponse =
            serde_json::from_str(r#"{"accepted": false, "reason": "already picked"}"#).unwrap();
        assert!(!parsed.accepted);
        assert_eq!(parsed.reason.as_deref(), Some("already picked"));

        let parsed: ChangeResponse = serde_json::from_str(r#"{"accepted": true}"#).unwrap();
        assert!(parsed.accepted);
        assert!(parsed.reason.is_none());
    }
}
