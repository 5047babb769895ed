//! HTTP surface — inbound webhooks and operator endpoints.
//!
//! Exposed routes:
//! - `POST /webhooks/inbound-email` — raw MIME in, intake pipeline out
//! - `POST /webhooks/warehouse-reply` — warehouse reply keyed by workflow id
//!   or order number; stale replies get a structured outcome, not an error
//! - `POST /api/test-workflows` — operator self-verification: full state
//!   machine with mutating backend calls stubbed, notifications real
//! - `GET  /api/workflows/{id}` — record + audit trail
//! - `GET  /api/operator-queue` — failed + escalated workflows
//! - `GET  /api/triage` — unclassifiable emails parked for review

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, WorkflowError};
use crate::intake::{IntakeOutcome, IntakeProcessor, InboundEmail, IntentExtractor, parse_mime};
use crate::order::{Address, FulfillmentMethod, Order, RequestType};
use crate::store::WorkflowStore;
use crate::workflow::engine::{
    CancelOutcome, CreateOutcome, ReplyOutcome, ReplyTarget, RunOutcome, SuspendReason,
    WorkflowEngine,
};

/// User id stamped onto operator test workflows.
const TEST_WORKFLOW_USER: &str = "operator-test";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeProcessor>,
    pub engine: Arc<WorkflowEngine>,
    /// Engine wired with dry-run backends for the test trigger.
    pub test_engine: Arc<WorkflowEngine>,
    pub extractor: Arc<dyn IntentExtractor>,
    pub store: Arc<dyn WorkflowStore>,
}

/// Build the Axum router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/inbound-email", post(inbound_email))
        .route("/webhooks/warehouse-reply", post(warehouse_reply))
        .route("/api/test-workflows", post(test_workflow))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/cancel", post(cancel_workflow))
        .route("/api/operator-queue", get(operator_queue))
        .route("/api/triage", get(triage_queue))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: Error) -> ApiError {
    tracing::error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": message.into() })),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "order-assist"
    }))
}

// ── Inbound email webhook ───────────────────────────────────────────

async fn inbound_email(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = parse_mime(&body).map_err(|e| bad_request(e.to_string()))?;
    let outcome = state
        .intake
        .process(&email)
        .await
        .map_err(internal_error)?;
    Ok(Json(intake_outcome_json(&outcome)))
}

fn intake_outcome_json(outcome: &IntakeOutcome) -> serde_json::Value {
    match outcome {
        IntakeOutcome::Dropped { reason } => json!({
            "outcome": "dropped",
            "reason": reason,
        }),
        IntakeOutcome::ManualTriage { reason } => json!({
            "outcome": "manual_triage",
            "reason": reason,
        }),
        IntakeOutcome::Merged { workflow_id } => json!({
            "outcome": "merged",
            "workflow_id": workflow_id,
        }),
        IntakeOutcome::Started { workflow_id, run } => json!({
            "outcome": "started",
            "workflow_id": workflow_id,
            "run": run_outcome_json(run),
        }),
    }
}

fn run_outcome_json(run: &RunOutcome) -> serde_json::Value {
    match run {
        RunOutcome::Terminal(status) => json!({ "state": "terminal", "status": status }),
        RunOutcome::Suspended(SuspendReason::AwaitingExternalConfirmation) => {
            json!({ "state": "suspended", "reason": "awaiting_external_confirmation" })
        }
        RunOutcome::Suspended(SuspendReason::PendingApproval) => {
            json!({ "state": "suspended", "reason": "pending_approval" })
        }
    }
}

// ── Warehouse reply webhook ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WarehouseReplyRequest {
    #[serde(default)]
    workflow_id: Option<Uuid>,
    #[serde(default)]
    order_number: Option<String>,
    reply: String,
}

async fn warehouse_reply(
    State(state): State<AppState>,
    Json(request): Json<WarehouseReplyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = match (request.workflow_id, request.order_number) {
        (Some(id), _) => ReplyTarget::WorkflowId(id),
        (None, Some(order_number)) => ReplyTarget::OrderNumber(order_number),
        (None, None) => {
            return Err(bad_request("workflow_id or order_number is required"));
        }
    };

    match state.engine.submit_reply(target, &request.reply).await {
        Ok(ReplyOutcome::Resumed { id, status }) => Ok(Json(json!({
            "outcome": "resumed",
            "workflow_id": id,
            "status": status,
        }))),
        Ok(ReplyOutcome::Stale { id, status }) => Ok(Json(json!({
            "outcome": "stale_reply",
            "workflow_id": id,
            "status": status,
        }))),
        Err(Error::Workflow(
            e @ (WorkflowError::NotFound { .. } | WorkflowError::NotFoundForOrder { .. }),
        )) => Err(not_found(e.to_string())),
        Err(e) => Err(internal_error(e)),
    }
}

// ── Test-workflow trigger ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TestWorkflowRequest {
    customer_email: String,
    /// Raw email text to classify. Required unless `request_type` is given.
    #[serde(default)]
    email_body: Option<String>,
    #[serde(default)]
    request_type: Option<RequestType>,
    #[serde(default)]
    order_number: Option<String>,
    #[serde(default)]
    requested_address: Option<Address>,
    #[serde(default)]
    fulfillment_method: Option<FulfillmentMethod>,
}

/// Synthesize a workflow and drive it through the dry-run engine. Backend
/// mutations are no-ops; notifications are genuinely sent so the operator
/// can verify templates and addresses end to end.
async fn test_workflow(
    State(state): State<AppState>,
    Json(request): Json<TestWorkflowRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order_number = request
        .order_number
        .unwrap_or_else(|| format!("TEST-{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase()));

    // Classify the supplied email text unless the caller fixed the type.
    let (request_type, requested_address) = match request.request_type {
        Some(rt) => (rt, request.requested_address),
        None => {
            let body = request
                .email_body
                .as_deref()
                .filter(|b| !b.trim().is_empty())
                .ok_or_else(|| bad_request("email_body or request_type is required"))?;
            let email = InboundEmail {
                message_id: format!("test-{order_number}"),
                sender: request.customer_email.clone(),
                sender_name: None,
                subject: Some(format!("Test workflow for {order_number}")),
                body: body.to_string(),
                received_at: Utc::now(),
            };
            let intent = state
                .extractor
                .extract(&email)
                .await
                .map_err(|e| bad_request(format!("intent extraction failed: {e}")))?;
            let rt = intent
                .request_type
                .ok_or_else(|| bad_request("no actionable request found in email_body"))?;
            (rt, request.requested_address.or(intent.requested_address))
        }
    };

    let order = Order {
        order_number: order_number.clone(),
        user_id: TEST_WORKFLOW_USER.into(),
        customer_email: request.customer_email.clone(),
        placed_at: Utc::now(),
        item_summary: "operator test order".into(),
        total: Decimal::ZERO,
        shipping_address: None,
    };
    let method = request
        .fulfillment_method
        .unwrap_or(state.engine.config().default_fulfillment_method);

    info!(order_number = %order_number, method = %method, "Running operator test workflow");

    let created = state
        .test_engine
        .create(
            order,
            &request.customer_email,
            request_type,
            requested_address,
            method,
        )
        .await
        .map_err(internal_error)?;

    match created {
        CreateOutcome::Merged { existing } => Ok(Json(json!({
            "outcome": "merged",
            "workflow_id": existing,
        }))),
        CreateOutcome::Created(id) => {
            let run = state.test_engine.run(id).await.map_err(internal_error)?;
            Ok(Json(json!({
                "outcome": "started",
                "workflow_id": id,
                "order_number": order_number,
                "run": run_outcome_json(&run),
            })))
        }
    }
}

// ── Workflow inspection ─────────────────────────────────────────────

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get_workflow(id)
        .await
        .map_err(|e| internal_error(e.into()))?
        .ok_or_else(|| not_found(format!("workflow {id} not found")))?;

    let events = state
        .store
        .list_events(id)
        .await
        .map_err(|e| internal_error(e.into()))?;

    let events: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            json!({
                "from_status": e.from_status,
                "to_status": e.to_status,
                "step": e.step,
                "detail": e.detail,
                "created_at": e.created_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "workflow": record,
        "events": events,
    })))
}

async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.engine.cancel_by_customer(id).await {
        Ok(CancelOutcome::Withdrawn) => Ok(Json(json!({ "outcome": "withdrawn" }))),
        Ok(CancelOutcome::TooLate) => Ok(Json(json!({
            "outcome": "too_late",
            "detail": "the fulfillment backend has already been contacted",
        }))),
        Ok(CancelOutcome::AlreadyTerminal) => Ok(Json(json!({ "outcome": "already_terminal" }))),
        Err(Error::Workflow(e @ WorkflowError::NotFound { .. })) => Err(not_found(e.to_string())),
        Err(e) => Err(internal_error(e)),
    }
}

async fn operator_queue(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let queue = state
        .store
        .list_operator_queue()
        .await
        .map_err(|e| internal_error(e.into()))?;
    Ok(Json(json!({ "workflows": queue })))
}

async fn triage_queue(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state
        .store
        .list_triage(100)
        .await
        .map_err(|e| internal_error(e.into()))?;

    let entries: Vec<serde_json::Value> = entries
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "sender": t.sender,
                "subject": t.subject,
                "body_excerpt": t.body_excerpt,
                "reason": t.reason,
                "created_at": t.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "entries": entries })))
}
