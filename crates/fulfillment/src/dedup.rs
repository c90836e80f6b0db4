//! Event deduplication
//!
//! Two tiers guard against webhook redelivery:
//!
//! - [`DedupWindow`]: a per-process map `event_id -> first_seen`,
//!   consulted synchronously before fan-out. Purely a fast-path
//!   optimization, never the system of record.
//! - [`EventStore`]: the durable authoritative gate. The Postgres backend
//!   claims exclusive processing rights with an
//!   `INSERT ... ON CONFLICT ... RETURNING` on the unique `event_id`
//!   constraint, so two concurrent deliveries can never both observe
//!   "not yet seen", across process restarts and instances. The in-memory
//!   backend mirrors the same semantics for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{FulfillmentError, FulfillmentResult};

/// Window for rate-limit style dedup (15 minutes)
pub const SHORT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Window for long-lived event references (24 hours)
pub const REFERENCE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// An event stuck in `processing` longer than this is considered abandoned
/// and may be re-claimed (crash recovery).
pub const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Outcome of a claim attempt against the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller holds exclusive processing rights
    Claimed,
    /// Another delivery already claimed or completed this event
    Duplicate,
}

/// Terminal processing result recorded against a claimed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    Success,
    PartialFailure,
    Error,
    /// Terminal-business failure (unmatched amount, missing contact);
    /// flagged for manual review, never retried
    NeedsReview,
}

impl ProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingResult::Success => "success",
            ProcessingResult::PartialFailure => "partial_failure",
            ProcessingResult::Error => "error",
            ProcessingResult::NeedsReview => "needs_review",
        }
    }
}

/// Fast in-memory dedup window, keyed by event id.
#[derive(Clone)]
pub struct DedupWindow {
    window: Duration,
    seen: Arc<RwLock<HashMap<String, OffsetDateTime>>>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether `event_id` was seen within the window.
    pub async fn is_duplicate(&self, event_id: &str) -> bool {
        let cutoff = OffsetDateTime::now_utc() - self.window;
        self.seen
            .read()
            .await
            .get(event_id)
            .is_some_and(|first_seen| *first_seen >= cutoff)
    }

    /// Record a sighting of `event_id`.
    ///
    /// Callers mark only after the durable store has answered the claim,
    /// so a store failure never leaves a window entry with no record
    /// behind it.
    pub async fn mark_seen(&self, event_id: &str) {
        self.seen
            .write()
            .await
            .insert(event_id.to_string(), OffsetDateTime::now_utc());
    }

    /// Evict entries older than the window.
    pub async fn cleanup(&self) -> usize {
        let cutoff = OffsetDateTime::now_utc() - self.window;
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, first_seen| *first_seen >= cutoff);
        before - seen.len()
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.read().await.is_empty()
    }
}

/// Stored webhook event row
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub order_id: Option<String>,
    pub processing_result: String,
    pub processing_started_at: OffsetDateTime,
    pub processing_duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct MemoryEvent {
    event_type: String,
    order_id: Option<String>,
    result: String,
    started_at: OffsetDateTime,
    duration_ms: Option<i64>,
    error: Option<String>,
    created_at: OffsetDateTime,
}

#[derive(Clone)]
enum Backend {
    Postgres(PgPool),
    Memory {
        events: Arc<Mutex<HashMap<String, MemoryEvent>>>,
        references: Arc<Mutex<HashMap<(String, String), String>>>,
    },
}

/// Durable at-most-once gate for webhook events.
#[derive(Clone)]
pub struct EventStore {
    backend: Backend,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    /// In-memory backend with the same claim semantics, for tests.
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory {
                events: Arc::new(Mutex::new(HashMap::new())),
                references: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }

    /// Atomically claim exclusive processing rights for `event_id`.
    ///
    /// The insert either lands (first delivery) or conflicts; the conflict
    /// branch only re-claims events stuck in `processing` past the timeout.
    /// Any other conflict means a concurrent or earlier delivery won the
    /// race and this one is a duplicate.
    pub async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        order_id: Option<&str>,
    ) -> FulfillmentResult<ClaimOutcome> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let claimed: Option<(Uuid,)> = sqlx::query_as(
                    r#"
                    INSERT INTO webhook_events
                        (event_id, event_type, order_id, processing_result, processing_started_at)
                    VALUES ($1, $2, $3, 'processing', NOW())
                    ON CONFLICT (event_id) DO UPDATE SET
                        processing_result = 'processing',
                        processing_started_at = NOW(),
                        error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
                    WHERE webhook_events.processing_result = 'processing'
                      AND webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL
                    RETURNING id
                    "#,
                )
                .bind(event_id)
                .bind(event_type)
                .bind(order_id)
                .bind(PROCESSING_TIMEOUT_MINUTES)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    tracing::error!(
                        event_id = %event_id,
                        error = %e,
                        "Failed to claim webhook event"
                    );
                    FulfillmentError::Database(e.to_string())
                })?;

                Ok(if claimed.is_some() {
                    ClaimOutcome::Claimed
                } else {
                    ClaimOutcome::Duplicate
                })
            }
            Backend::Memory { events, .. } => {
                let now = OffsetDateTime::now_utc();
                let mut events = events.lock().await;

                match events.get_mut(event_id) {
                    Some(existing) => {
                        let stuck_cutoff =
                            now - Duration::from_secs(PROCESSING_TIMEOUT_MINUTES as u64 * 60);
                        if existing.result == "processing" && existing.started_at < stuck_cutoff {
                            existing.started_at = now;
                            existing.error =
                                Some(format!("Recovered from stuck state at {}", now));
                            Ok(ClaimOutcome::Claimed)
                        } else {
                            Ok(ClaimOutcome::Duplicate)
                        }
                    }
                    None => {
                        events.insert(
                            event_id.to_string(),
                            MemoryEvent {
                                event_type: event_type.to_string(),
                                order_id: order_id.map(str::to_string),
                                result: "processing".to_string(),
                                started_at: now,
                                duration_ms: None,
                                error: None,
                                created_at: now,
                            },
                        );
                        Ok(ClaimOutcome::Claimed)
                    }
                }
            }
        }
    }

    /// Record the terminal outcome of a claimed event.
    pub async fn mark_result(
        &self,
        event_id: &str,
        result: ProcessingResult,
        duration_ms: i64,
        error: Option<&str>,
    ) -> FulfillmentResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    UPDATE webhook_events
                    SET processing_result = $1,
                        processing_duration_ms = $2,
                        error_message = $3
                    WHERE event_id = $4
                    "#,
                )
                .bind(result.as_str())
                .bind(duration_ms)
                .bind(error)
                .bind(event_id)
                .execute(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(())
            }
            Backend::Memory { events, .. } => {
                let mut events = events.lock().await;
                if let Some(record) = events.get_mut(event_id) {
                    record.result = result.as_str().to_string();
                    record.duration_ms = Some(duration_ms);
                    record.error = error.map(str::to_string);
                }
                Ok(())
            }
        }
    }

    /// Record a long-lived cross-system reference (e.g. payment id →
    /// event id). Idempotent on `(kind, transaction_id)`.
    pub async fn record_reference(
        &self,
        kind: &str,
        transaction_id: &str,
        event_id: &str,
    ) -> FulfillmentResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO event_references (kind, transaction_id, event_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (kind, transaction_id) DO NOTHING
                    "#,
                )
                .bind(kind)
                .bind(transaction_id)
                .bind(event_id)
                .execute(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(())
            }
            Backend::Memory { references, .. } => {
                references
                    .lock()
                    .await
                    .entry((kind.to_string(), transaction_id.to_string()))
                    .or_insert_with(|| event_id.to_string());
                Ok(())
            }
        }
    }

    /// Reset events stuck in `processing` past the timeout to `error` so
    /// they show up in failure listings. Returns rows affected.
    pub async fn reset_stuck(&self, older_than_minutes: i32) -> FulfillmentResult<u64> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    UPDATE webhook_events
                    SET processing_result = 'error',
                        error_message = CONCAT('Marked stuck at ', NOW()::TEXT)
                    WHERE processing_result = 'processing'
                      AND processing_started_at < NOW() - ($1 || ' minutes')::INTERVAL
                    "#,
                )
                .bind(older_than_minutes)
                .execute(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(result.rows_affected())
            }
            Backend::Memory { events, .. } => {
                let cutoff = OffsetDateTime::now_utc()
                    - Duration::from_secs(older_than_minutes as u64 * 60);
                let mut events = events.lock().await;
                let mut affected = 0;
                for record in events.values_mut() {
                    if record.result == "processing" && record.started_at < cutoff {
                        record.result = "error".to_string();
                        affected += 1;
                    }
                }
                Ok(affected)
            }
        }
    }

    /// Delete webhook event rows older than the retention period.
    pub async fn cleanup_events(&self, retention_days: i32) -> FulfillmentResult<u64> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    DELETE FROM webhook_events
                    WHERE created_at < NOW() - ($1 || ' days')::INTERVAL
                    "#,
                )
                .bind(retention_days)
                .execute(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(result.rows_affected())
            }
            Backend::Memory { events, .. } => {
                let cutoff = OffsetDateTime::now_utc()
                    - Duration::from_secs(retention_days as u64 * 24 * 60 * 60);
                let mut events = events.lock().await;
                let before = events.len();
                events.retain(|_, record| record.created_at >= cutoff);
                Ok((before - events.len()) as u64)
            }
        }
    }

    /// Delete event references older than 24 hours.
    pub async fn cleanup_references(&self) -> FulfillmentResult<u64> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let result = sqlx::query(
                    "DELETE FROM event_references WHERE created_at < NOW() - INTERVAL '24 hours'",
                )
                .execute(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(result.rows_affected())
            }
            // The memory backend keys references without timestamps; tests
            // never age them out
            Backend::Memory { .. } => Ok(0),
        }
    }

    /// List events that failed processing, newest first.
    pub async fn list_failed(&self, limit: i64) -> FulfillmentResult<Vec<WebhookEventRecord>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let records: Vec<WebhookEventRecord> = sqlx::query_as(
                    r#"
                    SELECT id, event_id, event_type, order_id, processing_result,
                           processing_started_at, processing_duration_ms, error_message,
                           created_at
                    FROM webhook_events
                    WHERE processing_result IN ('error', 'partial_failure', 'needs_review')
                    ORDER BY created_at DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(records)
            }
            Backend::Memory { events, .. } => {
                let events = events.lock().await;
                let mut records: Vec<WebhookEventRecord> = events
                    .iter()
                    .filter(|(_, r)| {
                        matches!(
                            r.result.as_str(),
                            "error" | "partial_failure" | "needs_review"
                        )
                    })
                    .map(|(event_id, r)| WebhookEventRecord {
                        id: Uuid::new_v4(),
                        event_id: event_id.clone(),
                        event_type: r.event_type.clone(),
                        order_id: r.order_id.clone(),
                        processing_result: r.result.clone(),
                        processing_started_at: r.started_at,
                        processing_duration_ms: r.duration_ms,
                        error_message: r.error.clone(),
                        created_at: r.created_at,
                    })
                    .collect();
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                records.truncate(limit as usize);
                Ok(records)
            }
        }
    }

    /// Processing status of a single event, if known.
    pub async fn status(&self, event_id: &str) -> FulfillmentResult<Option<String>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let status: Option<(String,)> = sqlx::query_as(
                    "SELECT processing_result FROM webhook_events WHERE event_id = $1",
                )
                .bind(event_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| FulfillmentError::Database(e.to_string()))?;
                Ok(status.map(|(s,)| s))
            }
            Backend::Memory { events, .. } => {
                Ok(events.lock().await.get(event_id).map(|r| r.result.clone()))
            }
        }
    }
}
