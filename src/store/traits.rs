//! `WorkflowStore` trait — single async interface for all persistence.
//!
//! The store is the single source of truth for workflow state. All mutation
//! goes through the engine's transition function and lands here via
//! `compare_and_swap`; nothing else writes workflow rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::order::RequestType;
use crate::workflow::model::WorkflowRecord;

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    /// The row matched the expected version and was updated.
    Applied,
    /// Someone else updated the row first; reload and reconsider.
    Conflict,
}

/// A persisted audit event for one workflow transition (or a rejected
/// external input, e.g. a stale reply).
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub step: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(
        workflow_id: Uuid,
        from_status: Option<&str>,
        to_status: &str,
        step: &str,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            from_status: from_status.map(String::from),
            to_status: to_status.to_string(),
            step: step.to_string(),
            detail,
            created_at: Utc::now(),
        }
    }
}

/// An inbound email that could not be classified confidently enough to
/// start a workflow; parked for a human to look at.
#[derive(Debug, Clone)]
pub struct TriageEntry {
    pub id: Uuid,
    pub sender: String,
    pub subject: Option<String>,
    pub body_excerpt: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl TriageEntry {
    pub fn new(
        sender: &str,
        subject: Option<&str>,
        body: &str,
        reason: impl Into<String>,
    ) -> Self {
        const EXCERPT_LEN: usize = 500;
        Self {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            subject: subject.map(String::from),
            body_excerpt: body.chars().take(EXCERPT_LEN).collect(),
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// Backend-agnostic persistence trait for workflows, audit events, triage,
/// and per-merchant settings.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Workflows ───────────────────────────────────────────────────

    /// Insert a new workflow record (version 0). Fails with
    /// `DatabaseError::Constraint` if an active workflow already exists for
    /// the same `(user_id, order_number, request_type)`.
    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), DatabaseError>;

    /// Get a workflow by ID.
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRecord>, DatabaseError>;

    /// Find the non-terminal workflow for an idempotency key, if any.
    async fn find_active(
        &self,
        user_id: &str,
        order_number: &str,
        request_type: RequestType,
    ) -> Result<Option<WorkflowRecord>, DatabaseError>;

    /// Find the workflow awaiting external confirmation for an order
    /// number (used by the reply webhook when no workflow id is given).
    async fn find_awaiting_by_order(
        &self,
        order_number: &str,
    ) -> Result<Option<WorkflowRecord>, DatabaseError>;

    /// The most recently transitioned workflow for an order number,
    /// regardless of status (stale-reply attribution).
    async fn find_latest_by_order(
        &self,
        order_number: &str,
    ) -> Result<Option<WorkflowRecord>, DatabaseError>;

    /// Persist `record` if the stored version still equals
    /// `expected_version`; the stored version becomes
    /// `expected_version + 1`. This is the only way workflow rows change.
    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected_version: i64,
        record: &WorkflowRecord,
    ) -> Result<CasResult, DatabaseError>;

    /// All non-terminal workflows (startup recovery).
    async fn list_non_terminal(&self) -> Result<Vec<WorkflowRecord>, DatabaseError>;

    /// Workflows awaiting external confirmation whose last transition is
    /// older than `cutoff` (escalation sweep).
    async fn list_awaiting_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRecord>, DatabaseError>;

    /// Failed and escalated workflows, most recent first (operator queue).
    async fn list_operator_queue(&self) -> Result<Vec<WorkflowRecord>, DatabaseError>;

    // ── Audit events ────────────────────────────────────────────────

    /// Append an audit event.
    async fn append_event(&self, event: &WorkflowEvent) -> Result<(), DatabaseError>;

    /// List audit events for a workflow, oldest first.
    async fn list_events(&self, workflow_id: Uuid) -> Result<Vec<WorkflowEvent>, DatabaseError>;

    // ── Manual triage ───────────────────────────────────────────────

    /// Park an unclassifiable inbound email for human review.
    async fn insert_triage(&self, entry: &TriageEntry) -> Result<(), DatabaseError>;

    /// List parked triage entries, most recent first.
    async fn list_triage(&self, limit: usize) -> Result<Vec<TriageEntry>, DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    /// Read a per-merchant setting.
    async fn get_setting(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, DatabaseError>;

    /// Write a per-merchant setting.
    async fn set_setting(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DatabaseError>;
}
