//! Persistence layer — libSQL-backed storage for workflows, audit events,
//! triage, and settings.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{CasResult, TriageEntry, WorkflowEvent, WorkflowStore};
