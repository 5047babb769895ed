//! Workflow state machine — records, engine, and escalation sweep.

pub mod engine;
pub mod escalation;
pub mod model;

pub use engine::{
    ApprovalGate, AutoApprove, CancelOutcome, CreateOutcome, Decision, EngineDeps, ReplyOutcome,
    ReplyTarget, RunOutcome, SuspendReason, WorkflowEngine,
};
pub use escalation::spawn_escalation_task;
pub use model::{ProgressFlags, WorkflowRecord, WorkflowStatus, WorkflowStep};
