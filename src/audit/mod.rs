//! Append-only audit trail
//!
//! One record per completed turn, never updated after the insert. Each
//! record carries a SHA-256 hash over its own contents so tampering can be
//! detected on read.

use crate::error::AgentError;
use crate::models::{AgentResponse, AttemptTrace, IntentResult, TurnStatus};
use crate::Result;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything known about a turn before its outcome is settled.
#[derive(Debug, Clone, Default)]
pub struct TurnDraft {
    pub session_id: Option<String>,
    pub query: String,
    pub intent: Option<IntentResult>,
    pub attempts: u32,
    pub last_feedback: String,
    pub trace: Vec<AttemptTrace>,
    pub elapsed_ms: u64,
}

impl TurnDraft {
    pub fn new(query: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            session_id,
            query: query.into(),
            ..Self::default()
        }
    }

    /// Seal the draft into a hashed record.
    pub fn finish(self, status: TurnStatus, response: AgentResponse) -> TurnRecord {
        let needs_review = self.intent.as_ref().map(IntentResult::needs_review).unwrap_or(false);

        let mut record = TurnRecord {
            audit_id: Uuid::new_v4(),
            session_id: self.session_id,
            query: self.query,
            intent: self.intent,
            status,
            attempts: self.attempts,
            last_feedback: self.last_feedback,
            needs_review,
            trace: self.trace,
            response,
            // Postgres keeps microseconds; truncate so the hash survives a round trip.
            created_at: Utc::now().trunc_subsecs(6),
            elapsed_ms: self.elapsed_ms,
            record_hash: String::new(),
        };
        record.record_hash = compute_record_hash(&record);
        record
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnRecord {
    pub audit_id: Uuid,
    pub session_id: Option<String>,
    pub query: String,
    pub intent: Option<IntentResult>,
    pub status: TurnStatus,
    pub attempts: u32,
    pub last_feedback: String,
    /// Low classifier confidence. Informational only.
    pub needs_review: bool,
    pub trace: Vec<AttemptTrace>,
    pub response: AgentResponse,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub record_hash: String,
}

/// Hashed view: the record minus its own hash.
#[derive(Serialize)]
struct HashedFields<'a> {
    audit_id: &'a Uuid,
    session_id: &'a Option<String>,
    query: &'a str,
    intent: &'a Option<IntentResult>,
    status: &'a TurnStatus,
    attempts: u32,
    last_feedback: &'a str,
    needs_review: bool,
    trace: &'a [AttemptTrace],
    response: &'a AgentResponse,
    created_at: &'a DateTime<Utc>,
    elapsed_ms: u64,
}

/// Compute SHA256 hash of a record for integrity verification
/// Uses zero-copy streaming serialization into hasher
pub fn compute_record_hash(record: &TurnRecord) -> String {
    let fields = HashedFields {
        audit_id: &record.audit_id,
        session_id: &record.session_id,
        query: &record.query,
        intent: &record.intent,
        status: &record.status,
        attempts: record.attempts,
        last_feedback: &record.last_feedback,
        needs_review: record.needs_review,
        trace: &record.trace,
        response: &record.response,
        created_at: &record.created_at,
        elapsed_ms: record.elapsed_ms,
    };

    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &fields).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

enum AuditBackend {
    InMemory {
        records: Arc<RwLock<Vec<TurnRecord>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

/// Audit trail storage
pub struct AuditLog {
    backend: AuditBackend,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            backend: AuditBackend::InMemory {
                records: Arc::new(RwLock::new(Vec::new())),
            },
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            backend: AuditBackend::Postgres {
                pool,
                schema_ready: Arc::new(OnceCell::new()),
            },
        }
    }

    /// Postgres when a URL is given and a lazy pool can be built,
    /// otherwise in-memory.
    pub fn from_database_url(database_url: Option<&str>) -> Self {
        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(url)
            {
                Ok(pool) => {
                    info!("Audit backend: postgres");
                    return Self::postgres(pool);
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres audit backend, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Audit backend: in-memory");
        Self::in_memory()
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            AuditBackend::InMemory { .. } => "in-memory",
            AuditBackend::Postgres { .. } => "postgres",
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let AuditBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS turn_audit (
                      audit_id UUID PRIMARY KEY,
                      session_id TEXT,
                      query TEXT NOT NULL,
                      intent TEXT,
                      status TEXT NOT NULL,
                      attempts INTEGER NOT NULL,
                      last_feedback TEXT NOT NULL,
                      needs_review BOOLEAN NOT NULL DEFAULT FALSE,
                      record_json TEXT NOT NULL,
                      record_hash TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_turn_audit_session_time
                    ON turn_audit (session_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!("Failed to initialize audit schema: {}", e))
            })?;

        Ok(())
    }

    /// Append a record. Ids are never reused or overwritten.
    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;

        match &self.backend {
            AuditBackend::InMemory { records } => {
                let mut records = records.write().await;
                if records.iter().any(|r| r.audit_id == audit_id) {
                    return Err(AgentError::AuditError(format!(
                        "audit record {} already exists",
                        audit_id
                    )));
                }
                records.push(record);
            }
            AuditBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let record_json = serde_json::to_string(&record)?;
                sqlx::query(
                    r#"
                    INSERT INTO turn_audit
                      (audit_id, session_id, query, intent, status, attempts, last_feedback, needs_review, record_json, record_hash, created_at)
                    VALUES
                      ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(record.audit_id)
                .bind(&record.session_id)
                .bind(&record.query)
                .bind(record.intent.as_ref().map(|i| i.intent().as_str()))
                .bind(record.status.as_str())
                .bind(record.attempts as i32)
                .bind(&record.last_feedback)
                .bind(record.needs_review)
                .bind(&record_json)
                .bind(&record.record_hash)
                .bind(record.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    AgentError::DatabaseError(format!("Failed to insert audit record: {}", e))
                })?;
            }
        }

        info!(audit_id = %audit_id, "Turn recorded");
        Ok(audit_id)
    }

    /// Retrieve a record by audit ID
    pub async fn get(&self, audit_id: Uuid) -> Result<Option<TurnRecord>> {
        match &self.backend {
            AuditBackend::InMemory { records } => {
                let records = records.read().await;
                Ok(records.iter().find(|r| r.audit_id == audit_id).cloned())
            }
            AuditBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let row = sqlx::query("SELECT record_json FROM turn_audit WHERE audit_id = $1")
                    .bind(audit_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        AgentError::DatabaseError(format!("Failed to load audit record: {}", e))
                    })?;

                match row {
                    Some(row) => {
                        let json: String = row.try_get("record_json").map_err(|e| {
                            AgentError::DatabaseError(format!("Malformed audit row: {}", e))
                        })?;
                        Ok(Some(serde_json::from_str(&json)?))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Audit IDs for a session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Uuid>> {
        match &self.backend {
            AuditBackend::InMemory { records } => {
                let records = records.read().await;

                let mut items: Vec<_> = records
                    .iter()
                    .filter(|r| r.session_id.as_deref() == Some(session_id))
                    .map(|r| (r.audit_id, r.created_at))
                    .collect();

                items.sort_by_key(|(_, created_at)| *created_at);

                Ok(items.into_iter().map(|(id, _)| id).collect())
            }
            AuditBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    "SELECT audit_id FROM turn_audit WHERE session_id = $1 ORDER BY created_at ASC",
                )
                .bind(session_id)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    AgentError::DatabaseError(format!("Failed to list audit records: {}", e))
                })?;

                rows.iter()
                    .map(|row| {
                        row.try_get::<Uuid, _>("audit_id").map_err(|e| {
                            AgentError::DatabaseError(format!("Malformed audit row: {}", e))
                        })
                    })
                    .collect()
            }
        }
    }

    /// Recompute a record's hash and compare it with the stored one.
    /// Missing records do not verify.
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        Ok(self
            .get(audit_id)
            .await?
            .map(|record| compute_record_hash(&record) == record.record_hash)
            .unwrap_or(false))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}
