//! Fulfillment backend adapters.
//!
//! One polymorphic interface over the three ways orders actually get
//! shipped/cancelled: a human warehouse team over email, a 3PL's API, and
//! the merchant's own store platform. The engine never branches on the
//! method — it resolves an adapter from the workflow's snapshot and speaks
//! the trait.

pub mod self_fulfillment;
pub mod three_pl;
pub mod warehouse;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryConfig;
use crate::eligibility::EligibilityResult;
use crate::error::{BackendError, WorkflowError};
use crate::order::{ChangeRequest, FulfillmentMethod, Order, RequestType};
use crate::workflow::model::WorkflowRecord;

pub use self_fulfillment::{SelfFulfillmentBackend, StorePlatformConfig};
pub use three_pl::{ThreePlBackend, ThreePlConfig};
pub use warehouse::WarehouseEmailBackend;

/// Result of asking a backend to apply a change.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// Whether the backend accepted the change. `false` means the change is
    /// no longer possible (e.g. already picked) — a normal CannotFulfill.
    pub accepted: bool,
    /// `true` when the real outcome arrives later from an external party
    /// (the warehouse email round-trip).
    pub requires_confirmation: bool,
    pub detail: Option<String>,
}

/// Result of finalizing a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    pub was_updated: bool,
    pub refund_eligible: bool,
    pub detail: Option<String>,
}

/// A fulfillment backend variant.
#[async_trait]
pub trait FulfillmentBackend: Send + Sync {
    fn method(&self) -> FulfillmentMethod;

    /// Whether `apply_change` only *requests* the change from an external
    /// party rather than performing it.
    fn requires_external_confirmation(&self) -> bool;

    /// Check whether the order can still be modified. May consult the live
    /// fulfillment status for API-backed variants.
    async fn check_eligibility(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<EligibilityResult, BackendError>;

    /// Apply (or request) the change. Synchronous mutation for API-backed
    /// variants; a coordination email for the warehouse variant.
    async fn apply_change(
        &self,
        workflow: &WorkflowRecord,
        change: &ChangeRequest,
    ) -> Result<ApplyOutcome, BackendError>;

    /// Settle the final outcome. `external_reply` is present only for
    /// variants that required confirmation.
    async fn finalize(
        &self,
        workflow: &WorkflowRecord,
        external_reply: Option<&str>,
    ) -> Result<FinalizeOutcome, BackendError>;
}

/// Lookup table from fulfillment method to adapter.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<FulfillmentMethod, Arc<dyn FulfillmentBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, backend: Arc<dyn FulfillmentBackend>) -> Self {
        self.backends.insert(backend.method(), backend);
        self
    }

    pub fn resolve(
        &self,
        method: FulfillmentMethod,
    ) -> Result<Arc<dyn FulfillmentBackend>, WorkflowError> {
        self.backends
            .get(&method)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownBackend {
                method: method.to_string(),
            })
    }
}

/// Run `op` with bounded exponential backoff on transient failures.
///
/// Permanent failures return immediately; transient failures retry up to
/// `config.max_attempts` total attempts with jittered exponential delays.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let exp = config
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                let jitter =
                    std::time::Duration::from_millis(rand::thread_rng().gen_range(0..250));
                let delay = exp.min(config.max_delay) + jitter;
                tracing::warn!(
                    operation = label,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient backend failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    operation = label,
                    attempt,
                    error = %e,
                    "Backend call failed"
                );
                return Err(e);
            }
        }
    }
}

/// No-op backend for operator test workflows: accepts everything, mutates
/// nothing. Notifications around it are still genuinely sent, so operators
/// can verify their templates and addresses end to end.
pub struct DryRunBackend {
    method: FulfillmentMethod,
    requires_confirmation: bool,
}

impl DryRunBackend {
    pub fn new(method: FulfillmentMethod) -> Self {
        Self {
            method,
            requires_confirmation: method == FulfillmentMethod::WarehouseEmail,
        }
    }
}

#[async_trait]
impl FulfillmentBackend for DryRunBackend {
    fn method(&self) -> FulfillmentMethod {
        self.method
    }

    fn requires_external_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    async fn check_eligibility(
        &self,
        _order: &Order,
        _now: DateTime<Utc>,
    ) -> Result<EligibilityResult, BackendError> {
        Ok(EligibilityResult::eligible("dry run — always eligible"))
    }

    async fn apply_change(
        &self,
        workflow: &WorkflowRecord,
        _change: &ChangeRequest,
    ) -> Result<ApplyOutcome, BackendError> {
        tracing::info!(
            workflow_id = %workflow.id,
            order_number = %workflow.order_number,
            "Dry run: skipping backend mutation"
        );
        Ok(ApplyOutcome {
            accepted: true,
            requires_confirmation: self.requires_confirmation,
            detail: Some("dry run — no backend mutation performed".into()),
        })
    }

    async fn finalize(
        &self,
        workflow: &WorkflowRecord,
        _external_reply: Option<&str>,
    ) -> Result<FinalizeOutcome, BackendError> {
        Ok(FinalizeOutcome {
            was_updated: true,
            refund_eligible: workflow.request_type == RequestType::Cancellation,
            detail: Some("dry run".into()),
        })
    }
}

/// Map a reqwest failure onto the transient/permanent split.
pub(crate) fn classify_http_error(method: FulfillmentMethod, e: reqwest::Error) -> BackendError {
    if e.is_timeout() || e.is_connect() {
        BackendError::Transient {
            method: method.to_string(),
            reason: e.to_string(),
        }
    } else {
        BackendError::Permanent {
            method: method.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Map a non-success HTTP status onto the transient/permanent split:
/// 5xx and 429 are retryable, other 4xx are not.
pub(crate) fn classify_http_status(
    method: FulfillmentMethod,
    status: reqwest::StatusCode,
    body: String,
) -> BackendError {
    let reason = format!("HTTP {status}: {body}");
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        BackendError::Transient {
            method: method.to_string(),
            reason,
        }
    } else {
        BackendError::Permanent {
            method: method.to_string(),
            reason,
        }
    }
}
