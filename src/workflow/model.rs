//! Workflow record and state machine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::order::{Address, ChangeRequest, FulfillmentMethod, Order, RequestType};

/// Coarse status of a workflow. Moves only forward; the four terminal
/// states are immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// The engine is actively driving the workflow.
    Processing,
    /// Suspended, waiting for a human warehouse reply.
    AwaitingExternalConfirmation,
    /// The requested change was applied.
    Completed,
    /// The request could not be fulfilled — a normal outcome, not an error.
    CannotFulfill,
    /// Automation hit an unrecoverable error; an operator must act.
    Failed,
    /// No warehouse reply in time; handed off to an operator.
    Escalated,
}

impl WorkflowStatus {
    /// Whether a move to `target` is permitted. Same-status "moves" (step
    /// advances within `Processing`) are handled by the caller.
    pub fn can_transition_to(&self, target: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        matches!(
            (self, target),
            (Processing, AwaitingExternalConfirmation)
                | (Processing, Completed)
                | (Processing, CannotFulfill)
                | (Processing, Failed)
                | (AwaitingExternalConfirmation, Processing)
                | (AwaitingExternalConfirmation, Escalated)
                | (AwaitingExternalConfirmation, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CannotFulfill | Self::Failed | Self::Escalated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::AwaitingExternalConfirmation => "awaiting_external_confirmation",
            Self::Completed => "completed",
            Self::CannotFulfill => "cannot_fulfill",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "awaiting_external_confirmation" => Some(Self::AwaitingExternalConfirmation),
            "completed" => Some(Self::Completed),
            "cannot_fulfill" => Some(Self::CannotFulfill),
            "failed" => Some(Self::Failed),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained position within the workflow, used for resumability and
/// progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    IdentifyOrder,
    CheckEligibility,
    AcknowledgeCustomer,
    ContactBackend,
    AwaitConfirmation,
    Finalize,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentifyOrder => "identify_order",
            Self::CheckEligibility => "check_eligibility",
            Self::AcknowledgeCustomer => "acknowledge_customer",
            Self::ContactBackend => "contact_backend",
            Self::AwaitConfirmation => "await_confirmation",
            Self::Finalize => "finalize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identify_order" => Some(Self::IdentifyOrder),
            "check_eligibility" => Some(Self::CheckEligibility),
            "acknowledge_customer" => Some(Self::AcknowledgeCustomer),
            "contact_backend" => Some(Self::ContactBackend),
            "await_confirmation" => Some(Self::AwaitConfirmation),
            "finalize" => Some(Self::Finalize),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic progress flags — each is set at most once and never unset.
/// Together they make crash recovery safe: re-entry checks them before
/// repeating any external side effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressFlags {
    pub customer_ack_sent: bool,
    pub backend_contacted: bool,
    pub external_reply_received: bool,
    pub change_applied: bool,
    pub refund_processed: bool,
}

/// One workflow per customer request: the durable record the state machine
/// owns. Mutated only through the engine; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub user_id: String,
    pub order_number: String,
    pub customer_email: String,
    pub request_type: RequestType,
    /// Snapshot of the merchant's configured method at creation time.
    /// Settings changes never affect in-flight workflows.
    pub fulfillment_method: FulfillmentMethod,
    pub status: WorkflowStatus,
    pub step: WorkflowStep,
    pub flags: ProgressFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reply: Option<String>,
    /// Tri-state outcome: `None` until finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_updated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Order snapshot taken at creation.
    pub order: Order,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter; bumped by every persisted transition.
    pub version: i64,
}

impl WorkflowRecord {
    pub fn new(
        order: Order,
        requester_email: impl Into<String>,
        request_type: RequestType,
        fulfillment_method: FulfillmentMethod,
        requested_address: Option<Address>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: order.user_id.clone(),
            order_number: order.order_number.clone(),
            customer_email: requester_email.into(),
            request_type,
            fulfillment_method,
            status: WorkflowStatus::Processing,
            step: WorkflowStep::IdentifyOrder,
            flags: ProgressFlags::default(),
            requested_address,
            eligibility_reason: None,
            external_reply: None,
            was_updated: None,
            failure_reason: None,
            order,
            created_at: now,
            last_transition_at: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Move to a new status/step. Same-status moves advance the step only;
    /// cross-status moves are validated against the transition matrix.
    /// Terminal states reject everything.
    pub fn transition_to(
        &mut self,
        status: WorkflowStatus,
        step: WorkflowStep,
    ) -> Result<(), WorkflowError> {
        if self.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                id: self.id,
                status: self.status.to_string(),
            });
        }
        if status != self.status && !self.status.can_transition_to(status) {
            return Err(WorkflowError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        self.status = status;
        self.step = step;
        self.last_transition_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.last_transition_at);
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Logical lock / idempotency key: `(order_number, request_type)`.
    pub fn lock_key(&self) -> (String, RequestType) {
        (self.order_number.clone(), self.request_type)
    }

    /// The concrete change the backend should apply.
    pub fn change_request(&self) -> Result<ChangeRequest, WorkflowError> {
        match self.request_type {
            RequestType::Cancellation => Ok(ChangeRequest::Cancel),
            RequestType::AddressChange => {
                let address =
                    self.requested_address
                        .clone()
                        .ok_or_else(|| WorkflowError::MissingAddress {
                            order_number: self.order_number.clone(),
                        })?;
                Ok(ChangeRequest::Readdress {
                    new_address: address,
                })
            }
        }
    }

    // Flag setters are monotonic: they only ever set.

    pub fn mark_ack_sent(&mut self) {
        self.flags.customer_ack_sent = true;
    }

    pub fn mark_backend_contacted(&mut self) {
        self.flags.backend_contacted = true;
    }

    pub fn mark_external_reply(&mut self, reply: impl Into<String>) {
        self.flags.external_reply_received = true;
        self.external_reply = Some(reply.into());
    }

    pub fn mark_change_applied(&mut self) {
        self.flags.change_applied = true;
    }

    pub fn mark_refund_processed(&mut self) {
        self.flags.refund_processed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_order() -> Order {
        Order {
            order_number: "ORD-2001".into(),
            user_id: "merchant-1".into(),
            customer_email: "customer@example.com".into(),
            placed_at: Utc::now(),
            item_summary: "1x lamp".into(),
            total: dec!(89.00),
            shipping_address: None,
        }
    }

    fn test_record() -> WorkflowRecord {
        WorkflowRecord::new(
            test_order(),
            "customer@example.com",
            RequestType::Cancellation,
            FulfillmentMethod::WarehouseEmail,
            None,
        )
    }

    #[test]
    fn status_transitions_valid() {
        use WorkflowStatus::*;
        assert!(Processing.can_transition_to(AwaitingExternalConfirmation));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(CannotFulfill));
        assert!(Processing.can_transition_to(Failed));
        assert!(AwaitingExternalConfirmation.can_transition_to(Processing));
        assert!(AwaitingExternalConfirmation.can_transition_to(Escalated));
    }

    #[test]
    fn status_transitions_invalid() {
        use WorkflowStatus::*;
        assert!(!Completed.can_transition_to(Processing));
        assert!(!CannotFulfill.can_transition_to(Processing));
        assert!(!Escalated.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Escalated));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states() {
        use WorkflowStatus::*;
        for status in [Completed, CannotFulfill, Failed, Escalated] {
            assert!(status.is_terminal());
        }
        assert!(!Processing.is_terminal());
        assert!(!AwaitingExternalConfirmation.is_terminal());
    }

    #[test]
    fn record_walks_the_happy_path() {
        let mut record = test_record();
        assert_eq!(record.status, WorkflowStatus::Processing);
        assert_eq!(record.step, WorkflowStep::IdentifyOrder);

        record
            .transition_to(WorkflowStatus::Processing, WorkflowStep::CheckEligibility)
            .unwrap();
        record
            .transition_to(WorkflowStatus::Processing, WorkflowStep::AcknowledgeCustomer)
            .unwrap();
        record
            .transition_to(WorkflowStatus::Processing, WorkflowStep::ContactBackend)
            .unwrap();
        record
            .transition_to(
                WorkflowStatus::AwaitingExternalConfirmation,
                WorkflowStep::AwaitConfirmation,
            )
            .unwrap();
        record
            .transition_to(WorkflowStatus::Processing, WorkflowStep::Finalize)
            .unwrap();
        record
            .transition_to(WorkflowStatus::Completed, WorkflowStep::Finalize)
            .unwrap();

        assert!(record.is_terminal());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn terminal_record_rejects_all_transitions() {
        let mut record = test_record();
        record
            .transition_to(WorkflowStatus::CannotFulfill, WorkflowStep::CheckEligibility)
            .unwrap();

        let err = record
            .transition_to(WorkflowStatus::Processing, WorkflowStep::Finalize)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyTerminal { .. }));

        // Even a "move" to the same terminal status is rejected.
        let err = record
            .transition_to(WorkflowStatus::CannotFulfill, WorkflowStep::Finalize)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyTerminal { .. }));
    }

    #[test]
    fn invalid_cross_status_move_rejected() {
        let mut record = test_record();
        let err = record
            .transition_to(WorkflowStatus::Escalated, WorkflowStep::AwaitConfirmation)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn flags_are_monotonic() {
        let mut record = test_record();
        record.mark_backend_contacted();
        record.mark_backend_contacted();
        assert!(record.flags.backend_contacted);
        record.mark_external_reply("done");
        assert!(record.flags.external_reply_received);
        assert_eq!(record.external_reply.as_deref(), Some("done"));
    }

    #[test]
    fn change_request_requires_address_for_address_change() {
        let record = WorkflowRecord::new(
            test_order(),
            "customer@example.com",
            RequestType::AddressChange,
            FulfillmentMethod::SelfFulfillment,
            None,
        );
        assert!(matches!(
            record.change_request(),
            Err(WorkflowError::MissingAddress { .. })
        ));
    }

    #[test]
    fn status_serde_roundtrip() {
        for status in [
            WorkflowStatus::Processing,
            WorkflowStatus::AwaitingExternalConfirmation,
            WorkflowStatus::Completed,
            WorkflowStatus::CannotFulfill,
            WorkflowStatus::Failed,
            WorkflowStatus::Escalated,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: WorkflowStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
            assert_eq!(WorkflowStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn step_parse_roundtrip() {
        for step in [
            WorkflowStep::IdentifyOrder,
            WorkflowStep::CheckEligibility,
            WorkflowStep::AcknowledgeCustomer,
            WorkflowStep::ContactBackend,
            WorkflowStep::AwaitConfirmation,
            WorkflowStep::Finalize,
        ] {
            assert_eq!(WorkflowStep::parse(step.as_str()), Some(step));
        }
    }
}
