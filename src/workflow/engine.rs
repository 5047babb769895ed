//! Workflow state machine engine.
//!
//! Owns every mutation of workflow records. Transitions follow a
//! write-ahead discipline: each one is persisted (compare-and-swap) before
//! the next external call, so a crash resumes at the last durable step
//! instead of re-sending emails or re-applying a mutation.
//!
//! Concurrency: one logical lock per `(order_number, request_type)` guards
//! both resumption paths (warehouse reply vs. escalation timer). The store's
//! CAS is the backstop against other process instances.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{BackendRegistry, retry_with_backoff};
use crate::config::EngineConfig;
use crate::error::{DatabaseError, Error, WorkflowError};
use crate::notify::{
    NotificationDispatcher, NotifyContext, Template, dispatch_background,
};
use crate::order::{Address, FulfillmentMethod, Order, RequestType};
use crate::store::{CasResult, WorkflowEvent, WorkflowStore};
use crate::workflow::model::{WorkflowRecord, WorkflowStatus, WorkflowStep};

/// Decision from the optional pre-apply policy gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected { reason: String },
    /// Not decided yet; the workflow stays parked at `contact_backend` and
    /// is re-driven once the gate clears.
    Pending,
}

/// Policy gate consulted immediately before the backend mutation.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn before_apply(&self, record: &WorkflowRecord) -> Decision;
}

/// Default gate: everything is approved.
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn before_apply(&self, _record: &WorkflowRecord) -> Decision {
        Decision::Approved
    }
}

/// Outcome of creating a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Uuid),
    /// An active workflow already exists for this idempotency key; the new
    /// request was merged into it rather than duplicated.
    Merged { existing: Uuid },
}

/// Outcome of driving a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Terminal(WorkflowStatus),
    Suspended(SuspendReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// Waiting for the warehouse reply (or the escalation timer).
    AwaitingExternalConfirmation,
    /// The approval gate has not decided yet.
    PendingApproval,
}

/// How an inbound warehouse reply identifies its workflow.
#[derive(Debug, Clone)]
pub enum ReplyTarget {
    WorkflowId(Uuid),
    OrderNumber(String),
}

/// Outcome of submitting a warehouse reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Resumed { id: Uuid, status: WorkflowStatus },
    /// The workflow was no longer awaiting confirmation; the reply was
    /// audit-logged and ignored.
    Stale { id: Uuid, status: WorkflowStatus },
}

/// Outcome of a customer withdrawing their request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Withdrawn,
    /// The backend has already been contacted; the workflow can only
    /// complete or escalate now.
    TooLate,
    AlreadyTerminal,
}

/// Dependencies for the engine.
pub struct EngineDeps {
    pub store: Arc<dyn WorkflowStore>,
    pub backends: BackendRegistry,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub gate: Arc<dyn ApprovalGate>,
    /// Recipient for escalation/failure alerts, if configured.
    pub operator_address: Option<String>,
}

/// The workflow state machine.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    backends: BackendRegistry,
    dispatcher: Arc<dyn NotificationDispatcher>,
    gate: Arc<dyn ApprovalGate>,
    operator_address: Option<String>,
    config: EngineConfig,
    locks: Mutex<HashMap<(String, RequestType), Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        Self {
            store: deps.store,
            backends: deps.backends,
            dispatcher: deps.dispatcher,
            gate: deps.gate,
            operator_address: deps.operator_address,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get (or create) the logical lock for an idempotency key.
    async fn lock_for(&self, key: (String, RequestType)) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key).or_default())
    }

    async fn load(&self, id: Uuid) -> Result<WorkflowRecord, Error> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id }.into())
    }

    /// Persist `record` via CAS and append an audit event. The in-memory
    /// version is bumped on success.
    async fn persist(
        &self,
        record: &mut WorkflowRecord,
        from_status: Option<WorkflowStatus>,
        detail: Option<String>,
    ) -> Result<(), Error> {
        let expected = record.version;
        match self
            .store
            .compare_and_swap(record.id, expected, record)
            .await?
        {
            CasResult::Applied => {
                record.version = expected + 1;
                let event = WorkflowEvent::new(
                    record.id,
                    from_status.map(|s| s.as_str()),
                    record.status.as_str(),
                    record.step.as_str(),
                    detail,
                );
                if let Err(e) = self.store.append_event(&event).await {
                    tracing::warn!(workflow_id = %record.id, error = %e, "Audit event append failed");
                }
                tracing::debug!(
                    workflow_id = %record.id,
                    status = %record.status,
                    step = %record.step,
                    version = record.version,
                    "Workflow persisted"
                );
                Ok(())
            }
            CasResult::Conflict => Err(WorkflowError::ConcurrentUpdate {
                id: record.id,
                expected_version: expected,
            }
            .into()),
        }
    }

    /// Validate, transition, persist.
    async fn transition(
        &self,
        record: &mut WorkflowRecord,
        status: WorkflowStatus,
        step: WorkflowStep,
        detail: Option<String>,
    ) -> Result<(), Error> {
        let from = record.status;
        record.transition_to(status, step)?;
        self.persist(record, Some(from), detail).await
    }

    // ── Creation ────────────────────────────────────────────────────

    /// Create a workflow for a classified request.
    ///
    /// Exclusivity: at most one non-terminal workflow per
    /// `(user_id, order_number, request_type)`. A second request while one
    /// is active is merged into the existing workflow, never duplicated.
    pub async fn create(
        &self,
        order: Order,
        requester_email: &str,
        request_type: RequestType,
        requested_address: Option<Address>,
        fulfillment_method: FulfillmentMethod,
    ) -> Result<CreateOutcome, Error> {
        if request_type == RequestType::AddressChange && requested_address.is_none() {
            return Err(WorkflowError::MissingAddress {
                order_number: order.order_number.clone(),
            }
            .into());
        }

        if let Some(existing) = self
            .store
            .find_active(&order.user_id, &order.order_number, request_type)
            .await?
        {
            return self.merge_duplicate(existing).await;
        }

        let record = WorkflowRecord::new(
            order,
            requester_email,
            request_type,
            fulfillment_method,
            requested_address,
        );

        match self.store.create_workflow(&record).await {
            Ok(()) => {
                let event = WorkflowEvent::new(
                    record.id,
                    None,
                    record.status.as_str(),
                    record.step.as_str(),
                    Some(format!(
                        "workflow created ({} via {})",
                        record.request_type, record.fulfillment_method
                    )),
                );
                if let Err(e) = self.store.append_event(&event).await {
                    tracing::warn!(workflow_id = %record.id, error = %e, "Audit event append failed");
                }
                tracing::info!(
                    workflow_id = %record.id,
                    order_number = %record.order_number,
                    request_type = %record.request_type,
                    method = %record.fulfillment_method,
                    "Workflow created"
                );
                Ok(CreateOutcome::Created(record.id))
            }
            // Lost a creation race: the unique index caught a concurrent
            // insert for the same key. Merge into the winner.
            Err(DatabaseError::Constraint(_)) => {
                match self
                    .store
                    .find_active(&record.user_id, &record.order_number, request_type)
                    .await?
                {
                    Some(existing) => self.merge_duplicate(existing).await,
                    None => Err(WorkflowError::ConcurrentUpdate {
                        id: record.id,
                        expected_version: 0,
                    }
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn merge_duplicate(&self, existing: WorkflowRecord) -> Result<CreateOutcome, Error> {
        tracing::info!(
            workflow_id = %existing.id,
            order_number = %existing.order_number,
            "Duplicate request merged into active workflow"
        );
        let event = WorkflowEvent::new(
            existing.id,
            Some(existing.status.as_str()),
            existing.status.as_str(),
            existing.step.as_str(),
            Some("duplicate request received and merged".into()),
        );
        if let Err(e) = self.store.append_event(&event).await {
            tracing::warn!(workflow_id = %existing.id, error = %e, "Audit event append failed");
        }
        Ok(CreateOutcome::Merged {
            existing: existing.id,
        })
    }

    // ── Driving ─────────────────────────────────────────────────────

    /// Drive a workflow until it suspends or terminates.
    pub async fn run(&self, id: Uuid) -> Result<RunOutcome, Error> {
        let key = self.load(id).await?.lock_key();
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; another path may have advanced it.
        let record = self.load(id).await?;
        self.drive(record).await
    }

    /// Step loop. Caller must hold the logical lock for the record's key.
    async fn drive(&self, mut record: WorkflowRecord) -> Result<RunOutcome, Error> {
        loop {
            if record.status.is_terminal() {
                return Ok(RunOutcome::Terminal(record.status));
            }
            if record.status == WorkflowStatus::AwaitingExternalConfirmation {
                return Ok(RunOutcome::Suspended(
                    SuspendReason::AwaitingExternalConfirmation,
                ));
            }

            match record.step {
                WorkflowStep::IdentifyOrder => {
                    // The snapshot was resolved at intake; verify the request
                    // actually comes from the order's customer before acting.
                    if !record
                        .order
                        .customer_email
                        .eq_ignore_ascii_case(&record.customer_email)
                    {
                        let reason = format!(
                            "requester {} does not match the customer on order {}; \
                             manual review required",
                            record.customer_email, record.order_number
                        );
                        return self.fail(&mut record, reason).await;
                    }
                    self.transition(
                        &mut record,
                        WorkflowStatus::Processing,
                        WorkflowStep::CheckEligibility,
                        Some("order identified".into()),
                    )
                    .await?;
                }

                WorkflowStep::CheckEligibility => {
                    let backend = self.backends.resolve(record.fulfillment_method)?;
                    let result = retry_with_backoff(&self.config.retry, "check_eligibility", || {
                        backend.check_eligibility(&record.order, Utc::now())
                    })
                    .await;

                    match result {
                        Ok(eligibility) if eligibility.eligible => {
                            record.eligibility_reason = Some(eligibility.reason);
                            self.transition(
                                &mut record,
                                WorkflowStatus::Processing,
                                WorkflowStep::AcknowledgeCustomer,
                                Some("eligible".into()),
                            )
                            .await?;
                        }
                        Ok(eligibility) => {
                            // Ineligible is a normal terminal outcome.
                            record.eligibility_reason = Some(eligibility.reason.clone());
                            return self
                                .cannot_fulfill(&mut record, eligibility.reason)
                                .await;
                        }
                        Err(e) => return self.fail(&mut record, e.to_string()).await,
                    }
                }

                WorkflowStep::AcknowledgeCustomer => {
                    let already_sent = record.flags.customer_ack_sent;
                    record.mark_ack_sent();
                    // Write-ahead: persist the flag and the step advance
                    // before sending, so a crash cannot double-send.
                    self.transition(
                        &mut record,
                        WorkflowStatus::Processing,
                        WorkflowStep::ContactBackend,
                        Some("customer acknowledged".into()),
                    )
                    .await?;
                    if !already_sent {
                        dispatch_background(
                            Arc::clone(&self.dispatcher),
                            Template::CustomerAcknowledgment,
                            record.customer_email.clone(),
                            NotifyContext::for_workflow(&record),
                        );
                    }
                }

                WorkflowStep::ContactBackend => {
                    match self.contact_backend(&mut record).await? {
                        Some(outcome) => return Ok(outcome),
                        None => continue,
                    }
                }

                WorkflowStep::AwaitConfirmation | WorkflowStep::Finalize => {
                    return self.finalize(&mut record).await;
                }
            }
        }
    }

    /// The `contact_backend` step. Returns `Some(outcome)` when the workflow
    /// suspended or terminated, `None` to continue driving.
    async fn contact_backend(
        &self,
        record: &mut WorkflowRecord,
    ) -> Result<Option<RunOutcome>, Error> {
        match self.gate.before_apply(record).await {
            Decision::Approved => {}
            Decision::Rejected { reason } => {
                let outcome = self
                    .cannot_fulfill(record, format!("declined by policy: {reason}"))
                    .await?;
                return Ok(Some(outcome));
            }
            Decision::Pending => {
                tracing::info!(
                    workflow_id = %record.id,
                    "Approval gate pending; workflow parked at contact_backend"
                );
                return Ok(Some(RunOutcome::Suspended(SuspendReason::PendingApproval)));
            }
        }

        // Idempotency: the change is applied at most once.
        if record.flags.change_applied {
            self.transition(
                record,
                WorkflowStatus::Processing,
                WorkflowStep::Finalize,
                Some("change already applied; skipping backend call".into()),
            )
            .await?;
            return Ok(None);
        }

        let backend = self.backends.resolve(record.fulfillment_method)?;

        // Crash re-entry after the contact was persisted but before the
        // outcome was recorded. Never blindly re-invoke a mutating call.
        if record.flags.backend_contacted {
            if backend.requires_external_confirmation() {
                // The coordination email may already be out; resending would
                // duplicate it. Park and let the reply or the timer decide.
                self.transition(
                    record,
                    WorkflowStatus::AwaitingExternalConfirmation,
                    WorkflowStep::AwaitConfirmation,
                    Some("re-entered after interruption; awaiting warehouse reply".into()),
                )
                .await?;
                return Ok(Some(RunOutcome::Suspended(
                    SuspendReason::AwaitingExternalConfirmation,
                )));
            }
            let outcome = self
                .fail(
                    record,
                    "backend contact was interrupted before an outcome was recorded; \
                     manual verification required"
                        .into(),
                )
                .await?;
            return Ok(Some(outcome));
        }

        let change = record.change_request()?;

        // Write-ahead: record that we are about to contact the backend.
        record.mark_backend_contacted();
        self.persist(record, None, Some("contacting backend".into()))
            .await?;

        let result = retry_with_backoff(&self.config.retry, "apply_change", || {
            backend.apply_change(record, &change)
        })
        .await;

        match result {
            Ok(outcome) if !outcome.accepted => {
                let reason = outcome
                    .detail
                    .unwrap_or_else(|| "the backend declined the change".into());
                record.was_updated = Some(false);
                let outcome = self.cannot_fulfill(record, reason).await?;
                Ok(Some(outcome))
            }
            Ok(outcome) if outcome.requires_confirmation => {
                self.transition(
                    record,
                    WorkflowStatus::AwaitingExternalConfirmation,
                    WorkflowStep::AwaitConfirmation,
                    outcome.detail,
                )
                .await?;
                Ok(Some(RunOutcome::Suspended(
                    SuspendReason::AwaitingExternalConfirmation,
                )))
            }
            Ok(outcome) => {
                record.mark_change_applied();
                self.transition(
                    record,
                    WorkflowStatus::Processing,
                    WorkflowStep::Finalize,
                    outcome.detail,
                )
                .await?;
                Ok(None)
            }
            Err(e) => {
                let outcome = self.fail(record, e.to_string()).await?;
                Ok(Some(outcome))
            }
        }
    }

    /// The `finalize` step: settle the outcome and notify the customer.
    async fn finalize(&self, record: &mut WorkflowRecord) -> Result<RunOutcome, Error> {
        let backend = self.backends.resolve(record.fulfillment_method)?;
        let reply = record.external_reply.clone();

        let result = retry_with_backoff(&self.config.retry, "finalize", || {
            backend.finalize(record, reply.as_deref())
        })
        .await;

        match result {
            Ok(outcome) => {
                record.was_updated = Some(outcome.was_updated);
                if outcome.was_updated {
                    record.mark_change_applied();
                    if outcome.refund_eligible {
                        record.mark_refund_processed();
                    }
                }

                let (status, template) = if outcome.was_updated {
                    (WorkflowStatus::Completed, Template::CustomerCompleted)
                } else {
                    (WorkflowStatus::CannotFulfill, Template::CustomerCannotFulfill)
                };

                self.transition(record, status, WorkflowStep::Finalize, outcome.detail.clone())
                    .await?;

                let mut context = NotifyContext::for_workflow(record);
                if let Some(detail) = outcome.detail {
                    context = context.with_reason(detail);
                }
                dispatch_background(
                    Arc::clone(&self.dispatcher),
                    template,
                    record.customer_email.clone(),
                    context,
                );

                tracing::info!(
                    workflow_id = %record.id,
                    order_number = %record.order_number,
                    status = %status,
                    was_updated = outcome.was_updated,
                    "Workflow finalized"
                );
                Ok(RunOutcome::Terminal(status))
            }
            Err(e) => self.fail(record, e.to_string()).await,
        }
    }

    /// Terminal `CannotFulfill` with a customer explanation.
    async fn cannot_fulfill(
        &self,
        record: &mut WorkflowRecord,
        reason: String,
    ) -> Result<RunOutcome, Error> {
        let step = record.step;
        self.transition(
            record,
            WorkflowStatus::CannotFulfill,
            step,
            Some(reason.clone()),
        )
        .await?;

        dispatch_background(
            Arc::clone(&self.dispatcher),
            Template::CustomerCannotFulfill,
            record.customer_email.clone(),
            NotifyContext::for_workflow(record).with_reason(reason),
        );
        Ok(RunOutcome::Terminal(WorkflowStatus::CannotFulfill))
    }

    /// Terminal `Failed` with an operator alert. Automation never silently
    /// drops a customer request.
    async fn fail(
        &self,
        record: &mut WorkflowRecord,
        reason: String,
    ) -> Result<RunOutcome, Error> {
        tracing::error!(
            workflow_id = %record.id,
            order_number = %record.order_number,
            reason = %reason,
            "Workflow failed"
        );
        record.failure_reason = Some(reason.clone());
        let step = record.step;
        self.transition(record, WorkflowStatus::Failed, step, Some(reason))
            .await?;

        if let Some(ref operator) = self.operator_address {
            dispatch_background(
                Arc::clone(&self.dispatcher),
                Template::OperatorFailure,
                operator.clone(),
                NotifyContext::for_workflow(record),
            );
        }
        Ok(RunOutcome::Terminal(WorkflowStatus::Failed))
    }

    // ── Resumption paths ────────────────────────────────────────────

    /// Resume a suspended workflow with a warehouse reply.
    ///
    /// Replies for workflows not in `AwaitingExternalConfirmation` are
    /// stale: audit-logged and ignored, never a state change.
    pub async fn submit_reply(
        &self,
        target: ReplyTarget,
        reply: &str,
    ) -> Result<ReplyOutcome, Error> {
        let record = match target {
            ReplyTarget::WorkflowId(id) => self.load(id).await?,
            ReplyTarget::OrderNumber(ref order_number) => {
                // Prefer the awaiting workflow; fall back to the most recent
                // one so a late reply can still be attributed and logged.
                match self.store.find_awaiting_by_order(order_number).await? {
                    Some(record) => record,
                    None => self
                        .store
                        .find_latest_by_order(order_number)
                        .await?
                        .ok_or_else(|| WorkflowError::NotFoundForOrder {
                            order_number: order_number.clone(),
                        })?,
                }
            }
        };

        let lock = self.lock_for(record.lock_key()).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: the escalation timer may have won the race.
        let mut record = self.load(record.id).await?;

        if record.status != WorkflowStatus::AwaitingExternalConfirmation {
            tracing::warn!(
                workflow_id = %record.id,
                status = %record.status,
                "Stale warehouse reply ignored"
            );
            let excerpt: String = reply.chars().take(120).collect();
            let event = WorkflowEvent::new(
                record.id,
                Some(record.status.as_str()),
                record.status.as_str(),
                record.step.as_str(),
                Some(format!("stale reply ignored: {excerpt}")),
            );
            if let Err(e) = self.store.append_event(&event).await {
                tracing::warn!(workflow_id = %record.id, error = %e, "Audit event append failed");
            }
            return Ok(ReplyOutcome::Stale {
                id: record.id,
                status: record.status,
            });
        }

        record.mark_external_reply(reply);
        self.transition(
            &mut record,
            WorkflowStatus::Processing,
            WorkflowStep::Finalize,
            Some("warehouse reply received".into()),
        )
        .await?;

        let id = record.id;
        match self.drive(record).await? {
            RunOutcome::Terminal(status) => Ok(ReplyOutcome::Resumed { id, status }),
            RunOutcome::Suspended(_) => {
                // Finalize never suspends; keep the type total anyway.
                Ok(ReplyOutcome::Resumed {
                    id,
                    status: WorkflowStatus::Processing,
                })
            }
        }
    }

    /// Escalate every workflow whose reply window has expired.
    ///
    /// Idempotent under at-least-once timer delivery: the status is
    /// re-checked under the lock and the CAS write is the final arbiter, so
    /// concurrent sweeps (or a late reply racing the timer) are safe.
    pub async fn escalate_due(&self) -> Result<usize, Error> {
        let timeout = chrono::Duration::from_std(self.config.escalation.reply_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(8));
        let cutoff = Utc::now() - timeout;

        let due = self.store.list_awaiting_older_than(cutoff).await?;
        let mut escalated = 0;

        for stale in due {
            let lock = self.lock_for(stale.lock_key()).await;
            let _guard = lock.lock().await;

            let Some(mut record) = self.store.get_workflow(stale.id).await? else {
                continue;
            };
            if record.status != WorkflowStatus::AwaitingExternalConfirmation
                || record.last_transition_at >= cutoff
            {
                // A reply arrived (or another instance escalated) first.
                continue;
            }

            let result = self
                .transition(
                    &mut record,
                    WorkflowStatus::Escalated,
                    WorkflowStep::AwaitConfirmation,
                    Some("no warehouse reply within the configured window".into()),
                )
                .await;

            match result {
                Ok(()) => {
                    tracing::warn!(
                        workflow_id = %record.id,
                        order_number = %record.order_number,
                        "Workflow escalated after reply timeout"
                    );
                    if let Some(ref operator) = self.operator_address {
                        dispatch_background(
                            Arc::clone(&self.dispatcher),
                            Template::OperatorEscalation,
                            operator.clone(),
                            NotifyContext::for_workflow(&record),
                        );
                    }
                    escalated += 1;
                }
                Err(Error::Workflow(WorkflowError::ConcurrentUpdate { .. })) => {
                    // Another process instance won; nothing to do.
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(escalated)
    }

    /// Customer-requested withdrawal. A no-op terminal transition before the
    /// backend has been contacted; refused after.
    pub async fn cancel_by_customer(&self, id: Uuid) -> Result<CancelOutcome, Error> {
        let key = self.load(id).await?.lock_key();
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let mut record = self.load(id).await?;
        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        if record.flags.backend_contacted {
            return Ok(CancelOutcome::TooLate);
        }

        record.was_updated = Some(false);
        let step = record.step;
        self.transition(
            &mut record,
            WorkflowStatus::CannotFulfill,
            step,
            Some("withdrawn by customer".into()),
        )
        .await?;
        Ok(CancelOutcome::Withdrawn)
    }

    /// Startup recovery: re-drive every workflow that was mid-flight when
    /// the process stopped. Suspended workflows are left to the reply
    /// webhook and the escalation sweep.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, Error> {
        let records = self.store.list_non_terminal().await?;
        let processing: Vec<WorkflowRecord> = records
            .into_iter()
            .filter(|r| r.status == WorkflowStatus::Processing)
            .collect();
        let count = processing.len();

        let runs = processing.into_iter().map(|record| {
            let engine = Arc::clone(self);
            async move {
                if let Err(e) = engine.run(record.id).await {
                    tracing::error!(
                        workflow_id = %record.id,
                        error = %e,
                        "Recovery run failed"
                    );
                }
            }
        });
        futures::future::join_all(runs).await;

        if count > 0 {
            tracing::info!(count, "Recovered in-flight workflows");
        }
        Ok(count)
    }
}
