//! Intake processor — turns inbound customer emails into workflows.
//!
//! Flow:
//! 1. Rules engine (fast, no network) → may drop outright
//! 2. Intent extraction (external classifier) → structured intent
//! 3. Confidence gate → below threshold goes to manual triage, never into
//!    the workflow engine
//! 4. Order lookup + fulfillment-method snapshot → workflow creation + run

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::intake::rules::IntakeRules;
use crate::intake::types::{InboundEmail, IntentExtractor};
use crate::order::{FulfillmentMethod, OrderDirectory, RequestType};
use crate::store::TriageEntry;
use crate::workflow::engine::{CreateOutcome, RunOutcome, WorkflowEngine};

/// Setting key for the merchant's configured fulfillment method.
pub const FULFILLMENT_METHOD_SETTING: &str = "fulfillment_method";

/// What happened to an inbound email.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// Matched a drop rule; logged and discarded.
    Dropped { reason: String },
    /// Could not be classified confidently; parked for a human.
    ManualTriage { reason: String },
    /// An active workflow already exists for this request.
    Merged { workflow_id: Uuid },
    /// A workflow was created and driven.
    Started {
        workflow_id: Uuid,
        run: RunOutcome,
    },
}

/// Turns inbound emails into workflows (or triage entries).
pub struct IntakeProcessor {
    rules: IntakeRules,
    extractor: Arc<dyn IntentExtractor>,
    orders: Arc<dyn OrderDirectory>,
    engine: Arc<WorkflowEngine>,
}

impl IntakeProcessor {
    pub fn new(
        rules: IntakeRules,
        extractor: Arc<dyn IntentExtractor>,
        orders: Arc<dyn OrderDirectory>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            rules,
            extractor,
            orders,
            engine,
        }
    }

    /// Process a single inbound email end to end.
    pub async fn process(&self, email: &InboundEmail) -> Result<IntakeOutcome, Error> {
        info!(
            message_id = %email.message_id,
            sender = %email.sender,
            "Processing inbound email"
        );

        if let Some(reason) = self.rules.should_drop(email) {
            info!(message_id = %email.message_id, reason = %reason, "Email dropped by rules");
            return Ok(IntakeOutcome::Dropped { reason });
        }

        let intent = match self.extractor.extract(email).await {
            Ok(intent) => intent,
            Err(e) => {
                return self
                    .triage(email, format!("intent extraction failed: {e}"))
                    .await;
            }
        };

        let Some(request_type) = intent.request_type else {
            return self
                .triage(email, "no actionable order-modification request".into())
                .await;
        };

        let threshold = self.engine.config().min_intent_confidence;
        if intent.confidence < threshold {
            return self
                .triage(
                    email,
                    format!(
                        "extraction confidence {:.2} below threshold {threshold:.2}",
                        intent.confidence
                    ),
                )
                .await;
        }

        let order_number = match intent
            .order_number
            .or_else(|| self.rules.order_number_hint(email))
        {
            Some(number) => number,
            None => {
                return self
                    .triage(email, "could not determine an order number".into())
                    .await;
            }
        };

        if request_type == RequestType::AddressChange && intent.requested_address.is_none() {
            return self
                .triage(
                    email,
                    format!("address change for order {order_number} without a new address"),
                )
                .await;
        }

        let order = match self.orders.lookup(&order_number).await? {
            Some(order) => order,
            None => {
                return self
                    .triage(email, format!("order {order_number} not found"))
                    .await;
            }
        };

        // Snapshot the merchant's configured method now; later settings
        // changes must not touch this workflow.
        let method = self.resolve_method(&order.user_id).await?;

        match self
            .engine
            .create(
                order,
                &email.sender,
                request_type,
                intent.requested_address,
                method,
            )
            .await?
        {
            CreateOutcome::Merged { existing } => Ok(IntakeOutcome::Merged {
                workflow_id: existing,
            }),
            CreateOutcome::Created(id) => {
                let run = self.engine.run(id).await?;
                Ok(IntakeOutcome::Started {
                    workflow_id: id,
                    run,
                })
            }
        }
    }

    /// The merchant's configured fulfillment method, or the default.
    async fn resolve_method(&self, user_id: &str) -> Result<FulfillmentMethod, Error> {
        let configured = self
            .engine
            .store()
            .get_setting(user_id, FULFILLMENT_METHOD_SETTING)
            .await?;
        Ok(configured
            .as_deref()
            .and_then(FulfillmentMethod::parse)
            .unwrap_or(self.engine.config().default_fulfillment_method))
    }

    /// Park an email for human review.
    async fn triage(
        &self,
        email: &InboundEmail,
        reason: String,
    ) -> Result<IntakeOutcome, Error> {
        warn!(
            message_id = %email.message_id,
            sender = %email.sender,
            reason = %reason,
            "Email routed to manual triage"
        );
        let entry = TriageEntry::new(
            &email.sender,
            email.subject.as_deref(),
            &email.body,
            reason.clone(),
        );
        if let Err(e) = self.engine.store().insert_triage(&entry).await {
            warn!(error = %e, "Failed to persist triage entry");
        }
        Ok(IntakeOutcome::ManualTriage { reason })
    }
}
