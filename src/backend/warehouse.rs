//! Warehouse email backend — coordinates with a human warehouse team.
//!
//! `apply_change` only *requests* the change: it emails the warehouse and
//! reports `requires_confirmation = true`. The real outcome arrives later as
//! a free-text reply, which `finalize` interprets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;

use crate::backend::{ApplyOutcome, FinalizeOutcome, FulfillmentBackend};
use crate::config::EligibilityConfig;
use crate::eligibility::{self, EligibilityResult};
use crate::error::BackendError;
use crate::notify::{NotificationDispatcher, NotifyContext, Template};
use crate::order::{ChangeRequest, FulfillmentMethod, Order, RequestType};
use crate::workflow::model::WorkflowRecord;

/// How a warehouse reply reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyVerdict {
    /// The team did it.
    Confirmed,
    /// The team couldn't — typically already picked/packed.
    Declined,
    /// Neither reading is safe; a human must settle it.
    Unclear,
}

/// Interpret a free-text warehouse reply.
///
/// Negative markers are checked first so "can't cancel, already packed"
/// never reads as a confirmation.
pub fn interpret_reply(reply: &str) -> ReplyVerdict {
    // Compiled per call; replies are rare enough that this is fine.
    let negative = Regex::new(
        r"(?i)\b(can'?t|cannot|unable|too late|won'?t|already\s+(packed|shipped|picked|dispatched|out)|no longer possible|not possible|denied|refused?)\b",
    )
    .unwrap();
    let positive = Regex::new(
        r"(?i)\b(done|confirmed|cancell?ed|updated|changed|sorted|taken care of|will (do|cancel|update)|ok(ay)?|yes)\b",
    )
    .unwrap();

    if negative.is_match(reply) {
        ReplyVerdict::Declined
    } else if positive.is_match(reply) {
        ReplyVerdict::Confirmed
    } else {
        ReplyVerdict::Unclear
    }
}

/// Fulfillment via a human warehouse team reached over email.
pub struct WarehouseEmailBackend {
    dispatcher: Arc<dyn NotificationDispatcher>,
    warehouse_address: String,
    eligibility: EligibilityConfig,
}

impl WarehouseEmailBackend {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        warehouse_address: impl Into<String>,
        eligibility: EligibilityConfig,
    ) -> Self {
        Self {
            dispatcher,
            warehouse_address: warehouse_address.into(),
            eligibility,
        }
    }
}

#[async_trait]
impl FulfillmentBackend for WarehouseEmailBackend {
    fn method(&self) -> FulfillmentMethod {
        FulfillmentMethod::WarehouseEmail
    }

    fn requires_external_confirmation(&self) -> bool {
        true
    }

    async fn check_eligibility(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<EligibilityResult, BackendError> {
        Ok(eligibility::evaluate(
            order,
            FulfillmentMethod::WarehouseEmail,
            now,
            &self.eligibility,
        ))
    }

    async fn apply_change(
        &self,
        workflow: &WorkflowRecord,
        change: &ChangeRequest,
    ) -> Result<ApplyOutcome, BackendError> {
        let template = match change {
            ChangeRequest::Cancel => Template::WarehouseCancellationRequest,
            ChangeRequest::Readdress { .. } => Template::WarehouseAddressChangeRequest,
        };

        // The coordination email *is* the backend contact, so unlike the
        // customer-facing sends it is awaited and its failure is retryable.
        self.dispatcher
            .send(
                template,
                &self.warehouse_address,
                &NotifyContext::for_workflow(workflow),
            )
            .await
            .map_err(|e| BackendError::Transient {
                method: self.method().to_string(),
                reason: format!("warehouse coordination email failed: {e}"),
            })?;

        tracing::info!(
            workflow_id = %workflow.id,
            order_number = %workflow.order_number,
            warehouse = %self.warehouse_address,
            "Warehouse coordination email sent"
        );

        Ok(ApplyOutcome {
            accepted: true,
            requires_confirmation: true,
            detail: Some(format!("coordination email sent to {}", self.warehouse_address)),
        })
    }

    async fn finalize(
        &self,
        workflow: &WorkflowRecord,
        external_reply: Option<&str>,
    ) -> Result<FinalizeOutcome, BackendError> {
        let reply = external_reply.ok_or_else(|| BackendError::Permanent {
            method: self.method().to_string(),
            reason: "cannot finalize a warehouse workflow without a reply".into(),
        })?;

        match interpret_reply(reply) {
            ReplyVerdict::Confirmed => Ok(FinalizeOutcome {
                was_updated: true,
                refund_eligible: workflow.request_type == RequestType::Cancellation,
                detail: Some(format!("warehouse confirmed: {reply}")),
            }),
            ReplyVerdict::Declined => Ok(FinalizeOutcome {
                was_updated: false,
                refund_eligible: false,
                detail: Some(format!("warehouse declined: {reply}")),
            }),
            // Never guess on an ambiguous reply about an irreversible action.
            ReplyVerdict::Unclear => Err(BackendError::Permanent {
                method: self.method().to_string(),
                reason: format!("warehouse reply is ambiguous, manual review required: {reply}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_replies() {
        for reply in [
            "can't cancel, already packed",
            "Cannot do it, the order already shipped",
            "too late, sorry",
            "Unable to change the address at this point",
            "It's already out for delivery",
        ] {
            assert_eq!(interpret_reply(reply), ReplyVerdict::Declined, "{reply}");
        }
    }

    #[test]
    fn confirmed_replies() {
        for reply in [
            "done",
            "Cancelled the order, refund on its way",
            "Canceled!",
            "Address updated to the new one",
            "ok, will do",
            "Yes, taken care of",
        ] {
            assert_eq!(interpret_reply(reply), ReplyVerdict::Confirmed, "{reply}");
        }
    }

    #[test]
    fn unclear_replies() {
        for reply in ["who is this?", "which order do you mean?", ""] {
            assert_eq!(interpret_reply(reply), ReplyVerdict::Unclear, "{reply:?}");
        }
    }

    #[test]
    fn negative_wins_over_positive_phrasing() {
        // Contains "cancel" words but the negation must win.
        assert_eq!(
            interpret_reply("can't cancel, it was already picked this morning"),
            ReplyVerdict::Declined
        );
    }
}
