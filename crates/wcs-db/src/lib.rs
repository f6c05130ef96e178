//! Postgres-backed storage for the work coordinator: connection/migration
//! helpers, the `coordinate()` client for the atomic coordination call
//! (spec §4.1, implemented server-side in `migrations/0001_init.sql`),
//! dead-letter queries, and event-store append with bounded retry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use wcs_schemas::{CoordinationRequest, FailureReason, WorkBatch};

pub const ENV_DB_URL: &str = "WCS_DATABASE_URL";

/// Connect to Postgres using `WCS_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper: connect via `WCS_DATABASE_URL` and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'wcs' and table_name = 'outbox'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_outbox_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_outbox_table: bool,
}

/// Execute one coordination call (spec §4.1). Performs the caller's reported
/// outcomes, admits new messages, renews leases, and returns the next batch
/// of claimed work — all server-side, in one transaction.
pub async fn coordinate(pool: &PgPool, request: &CoordinationRequest) -> Result<WorkBatch> {
    let params = serde_json::to_value(request).context("serializing coordination request")?;

    let row: (Value,) = sqlx::query_as("select wcs.process_work_batch($1::jsonb)")
        .bind(params)
        .fetch_one(pool)
        .await
        .context("coordination call failed")?;

    serde_json::from_value(row.0).context("deserializing coordination response")
}

/// One failed outbox record, as surfaced by [`dead_letter_outbox`].
#[derive(Debug, Clone)]
pub struct OutboxDeadLetter {
    pub message_id: Uuid,
    pub destination: String,
    pub stream_id: Option<String>,
    pub attempts: i32,
    pub error: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

/// Permanently-failed outbox records (`status & FAILED != 0`), newest first.
pub async fn dead_letter_outbox(pool: &PgPool, limit: i64) -> Result<Vec<OutboxDeadLetter>> {
    let rows = sqlx::query(
        r#"
        select message_id, destination, stream_id, attempts, error, failure_reason
        from wcs.outbox
        where (status & 32768) != 0
        order by message_id desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("dead_letter_outbox failed")?;

    rows.into_iter().map(row_to_outbox_dead_letter).collect()
}

fn row_to_outbox_dead_letter(row: sqlx::postgres::PgRow) -> Result<OutboxDeadLetter> {
    let failure_reason: Option<i32> = row.try_get("failure_reason")?;
    Ok(OutboxDeadLetter {
        message_id: row.try_get("message_id")?,
        destination: row.try_get("destination")?,
        stream_id: row.try_get("stream_id")?,
        attempts: row.try_get("attempts")?,
        error: row.try_get("error")?,
        failure_reason: failure_reason.and_then(failure_reason_from_code),
    })
}

/// One failed inbox record, as surfaced by [`dead_letter_inbox`].
#[derive(Debug, Clone)]
pub struct InboxDeadLetter {
    pub message_id: Uuid,
    pub handler_name: String,
    pub stream_id: Option<String>,
    pub attempts: i32,
    pub error: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

/// Permanently-failed inbox records (`status & FAILED != 0`), newest first.
pub async fn dead_letter_inbox(pool: &PgPool, limit: i64) -> Result<Vec<InboxDeadLetter>> {
    let rows = sqlx::query(
        r#"
        select message_id, handler_name, stream_id, attempts, error, failure_reason
        from wcs.inbox
        where (status & 32768) != 0
        order by message_id desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("dead_letter_inbox failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let failure_reason: Option<i32> = row.try_get("failure_reason")?;
        out.push(InboxDeadLetter {
            message_id: row.try_get("message_id")?,
            handler_name: row.try_get("handler_name")?,
            stream_id: row.try_get("stream_id")?,
            attempts: row.try_get("attempts")?,
            error: row.try_get("error")?,
            failure_reason: failure_reason.and_then(failure_reason_from_code),
        });
    }
    Ok(out)
}

fn failure_reason_from_code(code: i32) -> Option<FailureReason> {
    match code {
        0 => Some(FailureReason::ValidationError),
        1 => Some(FailureReason::TransientError),
        _ => Some(FailureReason::Unknown),
    }
}

/// A new event-store row to append (spec §6 `event_store`).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub stream_id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_data: Value,
    pub metadata: Value,
    pub scope: Option<Value>,
    pub sequence_number: i64,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_id: Uuid,
    pub stream_id: String,
    pub version: i32,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

/// Append an event, computing its `version` as `max(version) + 1` within the
/// stream. Races against other writers on the `(stream_id, version)` unique
/// constraint are retried with linear backoff (10ms, 20ms, … up to 10
/// attempts) per spec §7's concurrent-write-conflict policy; the tenth
/// failure is surfaced as a fatal error.
pub async fn append_event(pool: &PgPool, draft: NewEvent) -> Result<EventRow> {
    const MAX_ATTEMPTS: u32 = 10;

    for attempt in 1..=MAX_ATTEMPTS {
        let next_version: i32 = sqlx::query_scalar(
            "select coalesce(max(version), 0) + 1 from wcs.event_store where stream_id = $1",
        )
        .bind(&draft.stream_id)
        .fetch_one(pool)
        .await
        .context("append_event version lookup failed")?;

        let result = sqlx::query(
            r#"
            insert into wcs.event_store
                (event_id, stream_id, aggregate_id, aggregate_type, event_type,
                 event_data, metadata, scope, sequence_number, version)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            returning event_id, stream_id, version, sequence_number, created_at
            "#,
        )
        .bind(draft.event_id)
        .bind(&draft.stream_id)
        .bind(&draft.aggregate_id)
        .bind(&draft.aggregate_type)
        .bind(&draft.event_type)
        .bind(&draft.event_data)
        .bind(&draft.metadata)
        .bind(&draft.scope)
        .bind(draft.sequence_number)
        .bind(next_version)
        .fetch_one(pool)
        .await;

        match result {
            Ok(row) => {
                return Ok(EventRow {
                    event_id: row.try_get("event_id")?,
                    stream_id: row.try_get("stream_id")?,
                    version: row.try_get("version")?,
                    sequence_number: row.try_get("sequence_number")?,
                    created_at: row.try_get("created_at")?,
                })
            }
            Err(sqlx::Error::Database(db_err)) if is_unique_violation(&*db_err) => {
                if attempt == MAX_ATTEMPTS {
                    return Err(anyhow::anyhow!(
                        "append_event: version conflict persisted after {MAX_ATTEMPTS} attempts"
                    ));
                }
                tokio::time::sleep(std::time::Duration::from_millis(10 * attempt as u64)).await;
                continue;
            }
            Err(e) => return Err(anyhow::Error::new(e).context("append_event failed")),
        }
    }

    unreachable!("loop always returns within MAX_ATTEMPTS")
}

fn is_unique_violation(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err.code().as_deref() == Some("23505")
}

/// Typed outcome for call sites that must branch on the error taxonomy
/// (spec §7) instead of just propagating `anyhow::Error`.
#[derive(Debug)]
pub enum CoordinationOutcome {
    Admitted,
    Duplicate,
    Conflict { retries_exhausted: bool },
    Fatal(anyhow::Error),
}

/// Same retry policy as [`append_event`], but reports a failed outcome
/// through [`CoordinationOutcome`] rather than an opaque `anyhow::Error`.
pub async fn append_event_classified(
    pool: &PgPool,
    draft: NewEvent,
) -> std::result::Result<EventRow, CoordinationOutcome> {
    append_event(pool, draft).await.map_err(|e| {
        if e.to_string().contains("version conflict persisted") {
            CoordinationOutcome::Conflict {
                retries_exhausted: true,
            }
        } else {
            CoordinationOutcome::Fatal(e)
        }
    })
}

/// Classifies one admitted message against a coordination response's
/// diagnostics (spec §7's "admission conflict" taxonomy entry).
pub fn classify_admission(batch: &WorkBatch, message_id: Uuid) -> CoordinationOutcome {
    let duplicate = batch
        .diagnostics
        .iter()
        .any(|d| d.message_id.as_uuid() == message_id);
    if duplicate {
        CoordinationOutcome::Duplicate
    } else {
        CoordinationOutcome::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_from_code_round_trips_known_values() {
        assert_eq!(
            failure_reason_from_code(0),
            Some(FailureReason::ValidationError)
        );
        assert_eq!(
            failure_reason_from_code(1),
            Some(FailureReason::TransientError)
        );
        assert_eq!(failure_reason_from_code(7), Some(FailureReason::Unknown));
    }
}
