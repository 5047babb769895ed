//! Self-fulfillment backend — the merchant ships orders themselves, so
//! modifications go straight to the store platform's admin API.
//!
//! No time window applies: eligibility is purely the live fulfillment
//! status. The same client also resolves order snapshots for intake
//! (`OrderDirectory`), since the store platform owns the order records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::{
    ApplyOutcome, FinalizeOutcome, FulfillmentBackend, classify_http_error, classify_http_status,
};
use crate::eligibility::EligibilityResult;
use crate::error::{BackendError, IntakeError};
use crate::order::{
    Address, ChangeRequest, FulfillmentMethod, Order, OrderDirectory, RequestType,
};
use crate::workflow::model::WorkflowRecord;

/// Store platform admin API configuration.
#[derive(Debug, Clone)]
pub struct StorePlatformConfig {
    pub base_url: String,
    pub api_token: SecretString,
    /// The merchant this installation serves; stamped onto order snapshots.
    pub merchant_id: String,
    pub timeout: Duration,
}

impl StorePlatformConfig {
    /// Build config from environment variables.
    /// Returns `None` if `ORDER_ASSIST_STORE_BASE_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ORDER_ASSIST_STORE_BASE_URL").ok()?;
        let api_token =
            SecretString::from(std::env::var("ORDER_ASSIST_STORE_API_TOKEN").unwrap_or_default());
        let merchant_id =
            std::env::var("ORDER_ASSIST_MERCHANT_ID").unwrap_or_else(|_| "default".into());
        let timeout = std::env::var("ORDER_ASSIST_STORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(15));
        Some(Self {
            base_url,
            api_token,
            merchant_id,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PlatformOrder {
    order_number: String,
    customer_email: String,
    placed_at: DateTime<Utc>,
    #[serde(default)]
    item_summary: String,
    total: Decimal,
    fulfillment_status: String,
    #[serde(default)]
    shipping_address: Option<Address>,
}

#[derive(Debug, Serialize)]
struct CancelBody {
    refund: bool,
}

#[derive(Debug, Serialize)]
struct ReaddressBody<'a> {
    shipping_address: &'a Address,
}

#[derive(Debug, Deserialize)]
struct MutationResponse {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Fulfillment via the merchant's own store platform.
pub struct SelfFulfillmentBackend {
    client: reqwest::Client,
    config: StorePlatformConfig,
}

impl SelfFulfillmentBackend {
    pub fn new(config: StorePlatformConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_order(&self, order_number: &str) -> Result<Option<PlatformOrder>, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("admin/orders/{order_number}")))
            .bearer_auth(self.config.api_token.expose_secret())
            .send()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(self.method(), status, body));
        }

        let order = response
            .json()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;
        Ok(Some(order))
    }

    fn to_order(&self, platform: PlatformOrder) -> Order {
        Order {
            order_number: platform.order_number,
            user_id: self.config.merchant_id.clone(),
            customer_email: platform.customer_email,
            placed_at: platform.placed_at,
            item_summary: platform.item_summary,
            total: platform.total,
            shipping_address: platform.shipping_address,
        }
    }
}

/// Fulfillment states in which a self-fulfilled order can no longer be
/// modified automatically.
fn is_past_modification(status: &str) -> bool {
    matches!(status, "picked" | "packed" | "shipped" | "fulfilled" | "delivered")
}

#[async_trait]
impl FulfillmentBackend for SelfFulfillmentBackend {
    fn method(&self) -> FulfillmentMethod {
        FulfillmentMethod::SelfFulfillment
    }

    fn requires_external_confirmation(&self) -> bool {
        false
    }

    async fn check_eligibility(
        &self,
        order: &Order,
        _now: DateTime<Utc>,
    ) -> Result<EligibilityResult, BackendError> {
        let platform = self
            .fetch_order(&order.order_number)
            .await?
            .ok_or_else(|| BackendError::Permanent {
                method: self.method().to_string(),
                reason: format!("order {} not found on the store platform", order.order_number),
            })?;

        if is_past_modification(&platform.fulfillment_status) {
            Ok(EligibilityResult::ineligible(format!(
                "order {} has already been {}",
                order.order_number, platform.fulfillment_status,
            )))
        } else {
            Ok(EligibilityResult::eligible(format!(
                "order {} is still {}",
                order.order_number, platform.fulfillment_status,
            )))
        }
    }

    async fn apply_change(
        &self,
        workflow: &WorkflowRecord,
        change: &ChangeRequest,
    ) -> Result<ApplyOutcome, BackendError> {
        let request = match change {
            ChangeRequest::Cancel => self
                .client
                .post(self.url(&format!("admin/orders/{}/cancel", workflow.order_number)))
                .json(&CancelBody { refund: true }),
            ChangeRequest::Readdress { new_address } => self
                .client
                .put(self.url(&format!(
                    "admin/orders/{}/shipping-address",
                    workflow.order_number
                )))
                .json(&ReaddressBody {
                    shipping_address: new_address,
                }),
        };

        let response = request
            .bearer_auth(self.config.api_token.expose_secret())
            .send()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(self.method(), status, body));
        }

        let result: MutationResponse = response
            .json()
            .await
            .map_err(|e| classify_http_error(self.method(), e))?;

        tracing::info!(
            workflow_id = %workflow.id,
            order_number = %workflow.order_number,
            accepted = result.ok,
            "Store platform change request completed"
        );

        Ok(ApplyOutcome {
            accepted: result.ok,
            requires_confirmation: false,
            detail: result.message,
        })
    }

    async fn finalize(
        &self,
        workflow: &WorkflowRecord,
        _external_reply: Option<&str>,
    ) -> Result<FinalizeOutcome, BackendError> {
        let was_updated = workflow.flags.change_applied;
        Ok(FinalizeOutcome {
            was_updated,
            refund_eligible: was_updated && workflow.request_type == RequestType::Cancellation,
            detail: None,
        })
    }
}

#[async_trait]
impl OrderDirectory for SelfFulfillmentBackend {
    async fn lookup(&self, order_number: &str) -> Result<Option<Order>, IntakeError> {
        let platform = self
            .fetch_order(order_number)
            .await
            .map_err(|e| IntakeError::OrderLookup {
                order_number: order_number.to_string(),
                reason: e.to_string(),
            })?;
        Ok(platform.map(|p| self.to_order(p)))
    }
}
