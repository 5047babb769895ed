//! libSQL backend — async `WorkflowStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::order::{FulfillmentMethod, Order, RequestType};
use crate::store::migrations;
use crate::store::traits::{CasResult, TriageEntry, WorkflowEvent, WorkflowStore};
use crate::workflow::model::{ProgressFlags, WorkflowRecord, WorkflowStatus, WorkflowStep};

/// libSQL workflow store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn flag(b: bool) -> i64 {
    if b { 1 } else { 0 }
}

fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_flag(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(flag(b)),
        None => libsql::Value::Null,
    }
}

fn map_insert_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Column order shared by every workflow SELECT.
const WORKFLOW_COLUMNS: &str = "id, user_id, order_number, customer_email, request_type, \
     fulfillment_method, status, step, customer_ack_sent, backend_contacted, \
     external_reply_received, change_applied, refund_processed, requested_address, \
     eligibility_reason, external_reply, was_updated, failure_reason, order_snapshot, \
     created_at, last_transition_at, completed_at, version";

/// Map a libsql row (in `WORKFLOW_COLUMNS` order) to a WorkflowRecord.
fn row_to_workflow(row: &libsql::Row) -> Result<WorkflowRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("workflow row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let user_id: String = row.get(1).map_err(parse)?;
    let order_number: String = row.get(2).map_err(parse)?;
    let customer_email: String = row.get(3).map_err(parse)?;
    let request_type_str: String = row.get(4).map_err(parse)?;
    let method_str: String = row.get(5).map_err(parse)?;
    let status_str: String = row.get(6).map_err(parse)?;
    let step_str: String = row.get(7).map_err(parse)?;

    let flags = ProgressFlags {
        customer_ack_sent: row.get::<i64>(8).map_err(parse)? != 0,
        backend_contacted: row.get::<i64>(9).map_err(parse)? != 0,
        external_reply_received: row.get::<i64>(10).map_err(parse)? != 0,
        change_applied: row.get::<i64>(11).map_err(parse)? != 0,
        refund_processed: row.get::<i64>(12).map_err(parse)? != 0,
    };

    let requested_address_str: Option<String> = row.get(13).ok();
    let eligibility_reason: Option<String> = row.get(14).ok();
    let external_reply: Option<String> = row.get(15).ok();
    let was_updated: Option<bool> = row.get::<i64>(16).ok().map(|v| v != 0);
    let failure_reason: Option<String> = row.get(17).ok();
    let order_json: String = row.get(18).map_err(parse)?;
    let created_str: String = row.get(19).map_err(parse)?;
    let transition_str: String = row.get(20).map_err(parse)?;
    let completed_str: Option<String> = row.get(21).ok();
    let version: i64 = row.get(22).map_err(parse)?;

    let order: Order = serde_json::from_str(&order_json)
        .map_err(|e| DatabaseError::Serialization(format!("order snapshot: {e}")))?;

    let requested_address = match requested_address_str {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| DatabaseError::Serialization(format!("requested address: {e}")))?,
        ),
        None => None,
    };

    Ok(WorkflowRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("workflow id: {e}")))?,
        user_id,
        order_number,
        customer_email,
        request_type: RequestType::parse(&request_type_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown request type: {request_type_str}"))
        })?,
        fulfillment_method: FulfillmentMethod::parse(&method_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown fulfillment method: {method_str}"))
        })?,
        status: WorkflowStatus::parse(&status_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown status: {status_str}"))
        })?,
        step: WorkflowStep::parse(&step_str)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown step: {step_str}")))?,
        flags,
        requested_address,
        eligibility_reason,
        external_reply,
        was_updated,
        failure_reason,
        order,
        created_at: parse_datetime(&created_str),
        last_transition_at: parse_datetime(&transition_str),
        completed_at: completed_str.as_deref().map(parse_datetime),
        version,
    })
}

async fn collect_workflows(
    mut rows: libsql::Rows,
    op: &str,
) -> Result<Vec<WorkflowRecord>, DatabaseError> {
    let mut records = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => records.push(row_to_workflow(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
    Ok(records)
}

fn row_to_event(row: &libsql::Row) -> Result<WorkflowEvent, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("event row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let workflow_id_str: String = row.get(1).map_err(parse)?;
    let from_status: Option<String> = row.get(2).ok();
    let to_status: String = row.get(3).map_err(parse)?;
    let step: String = row.get(4).map_err(parse)?;
    let detail: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6).map_err(parse)?;

    Ok(WorkflowEvent {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("event id: {e}")))?,
        workflow_id: Uuid::parse_str(&workflow_id_str)
            .map_err(|e| DatabaseError::Serialization(format!("event workflow id: {e}")))?,
        from_status,
        to_status,
        step,
        detail,
        created_at: parse_datetime(&created_str),
    })
}

// ── WorkflowStore impl ──────────────────────────────────────────────

#[async_trait]
impl WorkflowStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), DatabaseError> {
        let order_json = serde_json::to_string(&record.order)
            .map_err(|e| DatabaseError::Serialization(format!("order snapshot: {e}")))?;
        let address_json = record
            .requested_address
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("requested address: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO workflows (id, user_id, order_number, customer_email, request_type, \
                 fulfillment_method, status, step, customer_ack_sent, backend_contacted, \
                 external_reply_received, change_applied, refund_processed, requested_address, \
                 eligibility_reason, external_reply, was_updated, failure_reason, order_snapshot, \
                 created_at, last_transition_at, completed_at, version) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                params![
                    record.id.to_string(),
                    record.user_id.as_str(),
                    record.order_number.as_str(),
                    record.customer_email.as_str(),
                    record.request_type.as_str(),
                    record.fulfillment_method.as_str(),
                    record.status.as_str(),
                    record.step.as_str(),
                    flag(record.flags.customer_ack_sent),
                    flag(record.flags.backend_contacted),
                    flag(record.flags.external_reply_received),
                    flag(record.flags.change_applied),
                    flag(record.flags.refund_processed),
                    opt_text_owned(address_json),
                    opt_text_owned(record.eligibility_reason.clone()),
                    opt_text_owned(record.external_reply.clone()),
                    opt_flag(record.was_updated),
                    opt_text_owned(record.failure_reason.clone()),
                    order_json,
                    record.created_at.to_rfc3339(),
                    record.last_transition_at.to_rfc3339(),
                    opt_text_owned(record.completed_at.map(|t| t.to_rfc3339())),
                    record.version,
                ],
            )
            .await
            .map_err(|e| map_insert_err("create_workflow", e))?;

        debug!(workflow_id = %record.id, order_number = %record.order_number, "Workflow inserted");
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_workflow: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_workflow(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_workflow: {e}"))),
        }
    }

    async fn find_active(
        &self,
        user_id: &str,
        order_number: &str,
        request_type: RequestType,
    ) -> Result<Option<WorkflowRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     WHERE user_id = ?1 AND order_number = ?2 AND request_type = ?3 \
                     AND status IN ('processing', 'awaiting_external_confirmation')"
                ),
                params![user_id, order_number, request_type.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_active: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_workflow(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_active: {e}"))),
        }
    }

    async fn find_awaiting_by_order(
        &self,
        order_number: &str,
    ) -> Result<Option<WorkflowRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     WHERE order_number = ?1 AND status = 'awaiting_external_confirmation' \
                     ORDER BY last_transition_at DESC LIMIT 1"
                ),
                params![order_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_awaiting_by_order: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_workflow(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_awaiting_by_order: {e}"))),
        }
    }

    async fn find_latest_by_order(
        &self,
        order_number: &str,
    ) -> Result<Option<WorkflowRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     WHERE order_number = ?1 \
                     ORDER BY last_transition_at DESC LIMIT 1"
                ),
                params![order_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_latest_by_order: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_workflow(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_latest_by_order: {e}"))),
        }
    }

    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected_version: i64,
        record: &WorkflowRecord,
    ) -> Result<CasResult, DatabaseError> {
        let address_json = record
            .requested_address
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("requested address: {e}")))?;

        let affected = self
            .conn()
            .execute(
                "UPDATE workflows SET status = ?1, step = ?2, customer_ack_sent = ?3, \
                 backend_contacted = ?4, external_reply_received = ?5, change_applied = ?6, \
                 refund_processed = ?7, requested_address = ?8, eligibility_reason = ?9, \
                 external_reply = ?10, was_updated = ?11, failure_reason = ?12, \
                 last_transition_at = ?13, completed_at = ?14, version = ?15 \
                 WHERE id = ?16 AND version = ?17",
                params![
                    record.status.as_str(),
                    record.step.as_str(),
                    flag(record.flags.customer_ack_sent),
                    flag(record.flags.backend_contacted),
                    flag(record.flags.external_reply_received),
                    flag(record.flags.change_applied),
                    flag(record.flags.refund_processed),
                    opt_text_owned(address_json),
                    opt_text_owned(record.eligibility_reason.clone()),
                    opt_text_owned(record.external_reply.clone()),
                    opt_flag(record.was_updated),
                    opt_text_owned(record.failure_reason.clone()),
                    record.last_transition_at.to_rfc3339(),
                    opt_text_owned(record.completed_at.map(|t| t.to_rfc3339())),
                    expected_version + 1,
                    id.to_string(),
                    expected_version,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("compare_and_swap: {e}")))?;

        if affected > 0 {
            return Ok(CasResult::Applied);
        }

        // Nothing matched: either the row is gone or the version moved.
        match self.get_workflow(id).await? {
            Some(_) => Ok(CasResult::Conflict),
            None => Err(DatabaseError::NotFound {
                entity: "workflow".into(),
                id: id.to_string(),
            }),
        }
    }

    async fn list_non_terminal(&self) -> Result<Vec<WorkflowRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     WHERE status IN ('processing', 'awaiting_external_confirmation') \
                     ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_non_terminal: {e}")))?;
        collect_workflows(rows, "list_non_terminal").await
    }

    async fn list_awaiting_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     WHERE status = 'awaiting_external_confirmation' \
                     AND last_transition_at < ?1 \
                     ORDER BY last_transition_at ASC"
                ),
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_awaiting_older_than: {e}")))?;
        collect_workflows(rows, "list_awaiting_older_than").await
    }

    async fn list_operator_queue(&self) -> Result<Vec<WorkflowRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     WHERE status IN ('failed', 'escalated') \
                     ORDER BY last_transition_at DESC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_operator_queue: {e}")))?;
        collect_workflows(rows, "list_operator_queue").await
    }

    async fn append_event(&self, event: &WorkflowEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO workflow_events (id, workflow_id, from_status, to_status, step, \
                 detail, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id.to_string(),
                    event.workflow_id.to_string(),
                    opt_text_owned(event.from_status.clone()),
                    event.to_status.as_str(),
                    event.step.as_str(),
                    opt_text_owned(event.detail.clone()),
                    event.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_insert_err("append_event", e))?;
        Ok(())
    }

    async fn list_events(&self, workflow_id: Uuid) -> Result<Vec<WorkflowEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, workflow_id, from_status, to_status, step, detail, created_at \
                 FROM workflow_events WHERE workflow_id = ?1 ORDER BY created_at ASC",
                params![workflow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?;

        let mut events = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => events.push(row_to_event(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_events: {e}"))),
            }
        }
        Ok(events)
    }

    async fn insert_triage(&self, entry: &TriageEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO triage_queue (id, sender, subject, body_excerpt, reason, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id.to_string(),
                    entry.sender.as_str(),
                    opt_text_owned(entry.subject.clone()),
                    entry.body_excerpt.as_str(),
                    entry.reason.as_str(),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_insert_err("insert_triage", e))?;
        Ok(())
    }

    async fn list_triage(&self, limit: usize) -> Result<Vec<TriageEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, sender, subject, body_excerpt, reason, created_at \
                 FROM triage_queue ORDER BY created_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_triage: {e}")))?;

        let mut entries = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let parse =
                        |e: libsql::Error| DatabaseError::Query(format!("triage row parse: {e}"));
                    let id_str: String = row.get(0).map_err(parse)?;
                    entries.push(TriageEntry {
                        id: Uuid::parse_str(&id_str).map_err(|e| {
                            DatabaseError::Serialization(format!("triage id: {e}"))
                        })?,
                        sender: row.get(1).map_err(parse)?,
                        subject: row.get(2).ok(),
                        body_excerpt: row.get(3).map_err(parse)?,
                        reason: row.get(4).map_err(parse)?,
                        created_at: parse_datetime(&row.get::<String>(5).map_err(parse)?),
                    });
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_triage: {e}"))),
            }
        }
        Ok(entries)
    }

    async fn get_setting(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM settings WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get(0).map_err(|e| {
                DatabaseError::Query(format!("get_setting row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO settings (user_id, key, value, updated_at) \
                 VALUES (?1, ?2, ?3, datetime('now')) \
                 ON CONFLICT (user_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
                params![user_id, key, value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Address, Order};
    use rust_decimal_macros::dec;

    fn test_order(number: &str) -> Order {
        Order {
            order_number: number.into(),
            user_id: "merchant-1".into(),
            customer_email: "customer@example.com".into(),
            placed_at: Utc::now(),
            item_summary: "1x desk".into(),
            total: dec!(250.00),
            shipping_address: None,
        }
    }

    fn test_record(number: &str) -> WorkflowRecord {
        WorkflowRecord::new(
            test_order(number),
            "customer@example.com",
            RequestType::Cancellation,
            FulfillmentMethod::WarehouseEmail,
            None,
        )
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut record = test_record("ORD-100");
        record.requested_address = Some(Address {
            line1: "1 Main St".into(),
            line2: None,
            city: "Springfield".into(),
            region: None,
            postal_code: "12345".into(),
            country: "US".into(),
        });
        store.create_workflow(&record).await.unwrap();

        let loaded = store.get_workflow(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.order_number, "ORD-100");
        assert_eq!(loaded.status, WorkflowStatus::Processing);
        assert_eq!(loaded.step, WorkflowStep::IdentifyOrder);
        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.order.item_summary, "1x desk");
        assert_eq!(
            loaded.requested_address.unwrap().city,
            "Springfield".to_string()
        );
        assert!(loaded.was_updated.is_none());
    }

    #[tokio::test]
    async fn duplicate_active_request_hits_constraint() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.create_workflow(&test_record("ORD-101")).await.unwrap();

        let err = store
            .create_workflow(&test_record("ORD-101"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "{err}");
    }

    #[tokio::test]
    async fn terminal_workflow_allows_new_request() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut record = test_record("ORD-102");
        store.create_workflow(&record).await.unwrap();

        record
            .transition_to(WorkflowStatus::CannotFulfill, WorkflowStep::CheckEligibility)
            .unwrap();
        assert_eq!(
            store.compare_and_swap(record.id, 0, &record).await.unwrap(),
            CasResult::Applied
        );

        // The partial unique index only covers active workflows.
        store.create_workflow(&test_record("ORD-102")).await.unwrap();
    }

    #[tokio::test]
    async fn cas_applies_once_per_version() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut record = test_record("ORD-103");
        store.create_workflow(&record).await.unwrap();

        record
            .transition_to(WorkflowStatus::Processing, WorkflowStep::CheckEligibility)
            .unwrap();
        assert_eq!(
            store.compare_and_swap(record.id, 0, &record).await.unwrap(),
            CasResult::Applied
        );

        // Same expected version again: conflict.
        assert_eq!(
            store.compare_and_swap(record.id, 0, &record).await.unwrap(),
            CasResult::Conflict
        );

        let loaded = store.get_workflow(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.step, WorkflowStep::CheckEligibility);
    }

    #[tokio::test]
    async fn cas_on_missing_workflow_is_not_found() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let record = test_record("ORD-104");
        let err = store
            .compare_and_swap(record.id, 0, &record)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn find_active_ignores_terminal() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut record = test_record("ORD-105");
        store.create_workflow(&record).await.unwrap();

        let found = store
            .find_active("merchant-1", "ORD-105", RequestType::Cancellation)
            .await
            .unwrap();
        assert!(found.is_some());

        record
            .transition_to(WorkflowStatus::CannotFulfill, WorkflowStep::CheckEligibility)
            .unwrap();
        store.compare_and_swap(record.id, 0, &record).await.unwrap();

        let found = store
            .find_active("merchant-1", "ORD-105", RequestType::Cancellation)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn awaiting_sweep_and_order_lookup() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut record = test_record("ORD-106");
        store.create_workflow(&record).await.unwrap();

        record.mark_backend_contacted();
        record
            .transition_to(
                WorkflowStatus::AwaitingExternalConfirmation,
                WorkflowStep::AwaitConfirmation,
            )
            .unwrap();
        store.compare_and_swap(record.id, 0, &record).await.unwrap();

        let found = store.find_awaiting_by_order("ORD-106").await.unwrap();
        assert_eq!(found.unwrap().id, record.id);

        let due = store
            .list_awaiting_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);

        let not_due = store
            .list_awaiting_older_than(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(not_due.is_empty());
    }

    #[tokio::test]
    async fn operator_queue_lists_failed_and_escalated() {
        let store = LibSqlStore::new_memory().await.unwrap();

        let mut failed = test_record("ORD-107");
        store.create_workflow(&failed).await.unwrap();
        failed
            .transition_to(WorkflowStatus::Failed, WorkflowStep::ContactBackend)
            .unwrap();
        store.compare_and_swap(failed.id, 0, &failed).await.unwrap();

        let mut ok = test_record("ORD-108");
        store.create_workflow(&ok).await.unwrap();
        ok.transition_to(WorkflowStatus::Completed, WorkflowStep::Finalize)
            .unwrap();
        store.compare_and_swap(ok.id, 0, &ok).await.unwrap();

        let queue = store.list_operator_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, failed.id);
    }

    #[tokio::test]
    async fn events_append_and_list() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let record = test_record("ORD-109");
        store.create_workflow(&record).await.unwrap();

        store
            .append_event(&WorkflowEvent::new(
                record.id,
                None,
                "processing",
                "identify_order",
                Some("created".into()),
            ))
            .await
            .unwrap();
        store
            .append_event(&WorkflowEvent::new(
                record.id,
                Some("processing"),
                "processing",
                "check_eligibility",
                None,
            ))
            .await
            .unwrap();

        let events = store.list_events(record.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail.as_deref(), Some("created"));
    }

    #[tokio::test]
    async fn triage_roundtrip() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .insert_triage(&TriageEntry::new(
                "someone@example.com",
                Some("help"),
                "I have a question about my bill",
                "low extraction confidence",
            ))
            .await
            .unwrap();

        let entries = store.list_triage(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sender, "someone@example.com");
        assert_eq!(entries[0].reason, "low extraction confidence");
    }

    #[tokio::test]
    async fn workflows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order-assist.db");

        let record = test_record("ORD-110");
        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.create_workflow(&record).await.unwrap();
        }

        // A fresh process opens the same file and sees the workflow.
        let store = LibSqlStore::new_local(&path).await.unwrap();
        let loaded = store.get_workflow(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.order_number, "ORD-110");
        assert_eq!(loaded.status, WorkflowStatus::Processing);
    }

    #[tokio::test]
    async fn settings_roundtrip_and_upsert() {
        let store = LibSqlStore::new_memory().await.unwrap();
        assert!(store
            .get_setting("merchant-1", "fulfillment_method")
            .await
            .unwrap()
            .is_none());

        store
            .set_setting("merchant-1", "fulfillment_method", "warehouse_email")
            .await
            .unwrap();
        store
            .set_setting("merchant-1", "fulfillment_method", "self_fulfillment")
            .await
            .unwrap();

        assert_eq!(
            store
                .get_setting("merchant-1", "fulfillment_method")
                .await
                .unwrap()
                .as_deref(),
            Some("self_fulfillment")
        );
    }
}
