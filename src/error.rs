//! Error types for Order Assist.

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the inbound-email intake path.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Failed to parse inbound email: {0}")]
    Parse(String),

    #[error("Intent extraction failed: {0}")]
    Extraction(String),

    #[error("Order lookup failed for {order_number}: {reason}")]
    OrderLookup { order_number: String, reason: String },
}

/// Fulfillment backend errors.
///
/// `Transient` failures are retried with backoff; `Permanent` failures are
/// surfaced immediately and move the workflow to `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{method} backend transient failure: {reason}")]
    Transient { method: String, reason: String },

    #[error("{method} backend permanent failure: {reason}")]
    Permanent { method: String, reason: String },
}

impl BackendError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// The method label carried by the error.
    pub fn method(&self) -> &str {
        match self {
            Self::Transient { method, .. } | Self::Permanent { method, .. } => method,
        }
    }
}

/// Workflow state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {id} not found")]
    NotFound { id: Uuid },

    #[error("No workflow found for order {order_number}")]
    NotFoundForOrder { order_number: String },

    #[error("Workflow {id} cannot transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Workflow {id} is already terminal ({status})")]
    AlreadyTerminal { id: Uuid, status: String },

    #[error("Address change request for order {order_number} has no requested address")]
    MissingAddress { order_number: String },

    #[error("No backend registered for fulfillment method {method}")]
    UnknownBackend { method: String },

    #[error("Workflow {id} was modified concurrently (expected version {expected_version})")]
    ConcurrentUpdate { id: Uuid, expected_version: i64 },
}

/// Notification dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Failed to build message for template {template}: {reason}")]
    Build { template: String, reason: String },

    #[error("Transport failure sending {template}: {reason}")]
    Transport { template: String, reason: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
