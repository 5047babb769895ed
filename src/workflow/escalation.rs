//! Escalation sweep — detects warehouse non-response.
//!
//! A plain interval timer rather than per-workflow timers: the sweep asks
//! the store for every workflow whose reply window has expired and runs the
//! engine's idempotent escalation over them. Safe under multiple process
//! instances because escalation re-checks status under the logical lock and
//! the CAS write decides the winner.

use std::sync::Arc;

use crate::workflow::engine::WorkflowEngine;

/// Spawn the background task that periodically escalates overdue workflows.
pub fn spawn_escalation_task(engine: Arc<WorkflowEngine>) -> tokio::task::JoinHandle<()> {
    let interval = engine.config().escalation.sweep_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        // The first tick fires immediately; that's fine, an empty sweep is cheap.
        loop {
            tick.tick().await;
            match engine.escalate_due().await {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(count, "Escalated workflows past the reply window");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Escalation sweep failed");
                }
            }
        }
    })
}
