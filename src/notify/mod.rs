//! Notification dispatch boundary.
//!
//! The engine treats email delivery as fire-and-forget: sends get their own
//! bounded retry in a background task, and failures are logged, never fatal
//! to a workflow. The one exception is the warehouse coordination email,
//! which the warehouse backend awaits directly because it *is* the backend
//! contact.

pub mod smtp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::order::RequestType;
use crate::workflow::model::WorkflowRecord;

pub use smtp::{SmtpConfig, SmtpDispatcher};

/// Notification templates. Each maps to a subject/body pair in `render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// "We received your request and are on it."
    CustomerAcknowledgment,
    /// "We couldn't make this change" + reason.
    CustomerCannotFulfill,
    /// Final confirmation that the change went through.
    CustomerCompleted,
    /// Coordination request to the warehouse team (cancellation).
    WarehouseCancellationRequest,
    /// Coordination request to the warehouse team (address change).
    WarehouseAddressChangeRequest,
    /// Operator alert: workflow escalated after reply timeout.
    OperatorEscalation,
    /// Operator alert: workflow failed and needs manual handling.
    OperatorFailure,
}

impl Template {
    pub fn id(&self) -> &'static str {
        match self {
            Self::CustomerAcknowledgment => "customer_acknowledgment",
            Self::CustomerCannotFulfill => "customer_cannot_fulfill",
            Self::CustomerCompleted => "customer_completed",
            Self::WarehouseCancellationRequest => "warehouse_cancellation_request",
            Self::WarehouseAddressChangeRequest => "warehouse_address_change_request",
            Self::OperatorEscalation => "operator_escalation",
            Self::OperatorFailure => "operator_failure",
        }
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Everything a template needs to render.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyContext {
    pub order_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

impl NotifyContext {
    /// Build a context from a workflow record.
    pub fn for_workflow(record: &WorkflowRecord) -> Self {
        Self {
            order_number: record.order_number.clone(),
            request_type: Some(record.request_type),
            workflow_id: Some(record.id),
            item_summary: Some(record.order.item_summary.clone()),
            reason: record
                .failure_reason
                .clone()
                .or_else(|| record.eligibility_reason.clone()),
            requested_address: record.requested_address.as_ref().map(|a| a.one_line()),
            customer_email: Some(record.customer_email.clone()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Outbound notification boundary — the engine never talks SMTP directly.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        template: Template,
        recipient: &str,
        context: &NotifyContext,
    ) -> Result<(), NotifyError>;
}

/// Render a template into `(subject, body)`. Pure, so templates are
/// unit-testable without a transport.
pub fn render(template: Template, context: &NotifyContext) -> (String, String) {
    let order = &context.order_number;
    let request = context
        .request_type
        .map(|r| match r {
            RequestType::Cancellation => "cancellation",
            RequestType::AddressChange => "address change",
        })
        .unwrap_or("modification");

    match template {
        Template::CustomerAcknowledgment => (
            format!("We're on it — {request} request for order {order}"),
            format!(
                "Hi,\n\nWe received your {request} request for order {order} and \
                 are processing it now. You'll hear from us as soon as it's done.\n",
            ),
        ),
        Template::CustomerCannotFulfill => (
            format!("About your {request} request for order {order}"),
            format!(
                "Hi,\n\nUnfortunately we couldn't complete the {request} for order \
                 {order}.\n\nReason: {}\n\nReply to this email if you'd like a \
                 member of our team to take another look.\n",
                context.reason.as_deref().unwrap_or("the order could no longer be modified"),
            ),
        ),
        Template::CustomerCompleted => (
            format!("Done — {request} completed for order {order}"),
            format!(
                "Hi,\n\nGood news: the {request} for order {order} has been \
                 completed.{}\n",
                if context.request_type == Some(RequestType::AddressChange) {
                    context
                        .requested_address
                        .as_deref()
                        .map(|a| format!(" Your order will now ship to: {a}."))
                        .unwrap_or_default()
                } else {
                    " Any refund due will be issued to your original payment method.".to_string()
                },
            ),
        ),
        Template::WarehouseCancellationRequest => (
            format!("Action needed: cancel order {order}"),
            format!(
                "Please cancel order {order} ({}) if it has not yet been picked or \
                 packed.\n\nReply to this email with the outcome — a short \
                 \"done\" or \"can't cancel, already packed\" is enough.\n",
                context.item_summary.as_deref().unwrap_or("no item summary"),
            ),
        ),
        Template::WarehouseAddressChangeRequest => (
            format!("Action needed: address change for order {order}"),
            format!(
                "Please update the shipping address for order {order} ({}) if it \
                 has not yet been picked or packed.\n\nNew address: {}\n\nReply to \
                 this email with the outcome.\n",
                context.item_summary.as_deref().unwrap_or("no item summary"),
                context.requested_address.as_deref().unwrap_or("(missing)"),
            ),
        ),
        Template::OperatorEscalation => (
            format!("Escalated: no warehouse reply for order {order}"),
            format!(
                "Workflow {} for order {order} ({request}) got no warehouse reply \
                 within the configured window and has been escalated. Please take \
                 over.\nCustomer: {}\n",
                context
                    .workflow_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "(unknown)".into()),
                context.customer_email.as_deref().unwrap_or("(unknown)"),
            ),
        ),
        Template::OperatorFailure => (
            format!("Failed: {request} workflow for order {order}"),
            format!(
                "Workflow {} for order {order} ({request}) failed and needs manual \
                 handling.\nReason: {}\nCustomer: {}\n",
                context
                    .workflow_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "(unknown)".into()),
                context.reason.as_deref().unwrap_or("(none recorded)"),
                context.customer_email.as_deref().unwrap_or("(unknown)"),
            ),
        ),
    }
}

/// Fire-and-forget dispatch with bounded retry.
///
/// Spawns a background task; each failed attempt is logged and retried after
/// a short delay. Exhausted retries are logged at error level — notification
/// failure is never fatal to the workflow.
pub fn dispatch_background(
    dispatcher: Arc<dyn NotificationDispatcher>,
    template: Template,
    recipient: String,
    context: NotifyContext,
) {
    const ATTEMPTS: u32 = 3;
    const RETRY_DELAY: Duration = Duration::from_secs(5);

    tokio::spawn(async move {
        for attempt in 1..=ATTEMPTS {
            match dispatcher.send(template, &recipient, &context).await {
                Ok(()) => {
                    tracing::debug!(
                        template = %template,
                        recipient = %recipient,
                        order_number = %context.order_number,
                        "Notification sent"
                    );
                    return;
                }
                Err(e) if attempt < ATTEMPTS => {
                    tracing::warn!(
                        template = %template,
                        recipient = %recipient,
                        attempt,
                        error = %e,
                        "Notification send failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(
                        template = %template,
                        recipient = %recipient,
                        order_number = %context.order_number,
                        error = %e,
                        "Notification dropped after retries"
                    );
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> NotifyContext {
        NotifyContext {
            order_number: "ORD-3001".into(),
            request_type: Some(RequestType::Cancellation),
            workflow_id: Some(Uuid::new_v4()),
            item_summary: Some("3x mug".into()),
            reason: None,
            requested_address: None,
            customer_email: Some("customer@example.com".into()),
        }
    }

    #[test]
    fn acknowledgment_mentions_order_and_request() {
        let (subject, body) = render(Template::CustomerAcknowledgment, &context());
        assert!(subject.contains("ORD-3001"));
        assert!(body.contains("cancellation"));
    }

    #[test]
    fn cannot_fulfill_includes_reason() {
        let ctx = context().with_reason("the modification window closed");
        let (_, body) = render(Template::CustomerCannotFulfill, &ctx);
        assert!(body.contains("the modification window closed"));
    }

    #[test]
    fn cannot_fulfill_has_fallback_reason() {
        let (_, body) = render(Template::CustomerCannotFulfill, &context());
        assert!(body.contains("could no longer be modified"));
    }

    #[test]
    fn warehouse_address_request_carries_new_address() {
        let mut ctx = context();
        ctx.request_type = Some(RequestType::AddressChange);
        ctx.requested_address = Some("9 Elm St, Boston, 02101, US".into());
        let (subject, body) = render(Template::WarehouseAddressChangeRequest, &ctx);
        assert!(subject.contains("address change"));
        assert!(body.contains("9 Elm St"));
    }

    #[test]
    fn completed_address_change_confirms_destination() {
        let mut ctx = context();
        ctx.request_type = Some(RequestType::AddressChange);
        ctx.requested_address = Some("9 Elm St, Boston, 02101, US".into());
        let (_, body) = render(Template::CustomerCompleted, &ctx);
        assert!(body.contains("ship to: 9 Elm St"));
    }

    #[test]
    fn operator_templates_name_the_workflow() {
        let ctx = context().with_reason("3PL returned 502 three times");
        let (_, body) = render(Template::OperatorFailure, &ctx);
        assert!(body.contains("3PL returned 502"));
        assert!(body.contains(&ctx.workflow_id.unwrap().to_string()));
    }

    #[test]
    fn template_ids_are_stable() {
        assert_eq!(Template::CustomerAcknowledgment.id(), "customer_acknowledgment");
        assert_eq!(Template::OperatorEscalation.id(), "operator_escalation");
    }
}
