//! Waiting queue persistence
//!
//! Entries are served in `(priority DESC, created_at ASC, id ASC)` order.
//! A drain claims one entry at a time with a conditional UPDATE that only
//! succeeds while the entry is still `waiting` and nobody else holds an
//! unexpired lease on it, so two engine instances never pop the same entry.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{LineEngineError, Result};
use crate::queue::{QueueEntry, QueueStatus};
use crate::types::{LineId, OperatorId, SegmentId};

const ENTRY_COLUMNS: &str = "id, operator_id, segment_id, priority, status, created_at, expires_at, \
     assigned_line_id, claim_token, claimed_until, updated_at";

/// Waiting entries grouped by segment
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SegmentDepth {
    pub segment_id: Option<SegmentId>,
    pub waiting: i64,
}

pub async fn insert_waiting(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    segment_id: Option<SegmentId>,
    priority: i64,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<QueueEntry> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO queue_entries (operator_id, segment_id, priority, status, created_at, expires_at, updated_at)
        VALUES (?, ?, ?, 'waiting', ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(operator_id)
    .bind(segment_id)
    .bind(priority)
    .bind(now)
    .bind(expires_at)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!("📥 Queue entry {} created for operator {}", id, operator_id);
    get_entry(conn, id)
        .await?
        .ok_or_else(|| LineEngineError::internal(format!("queue entry {} vanished after insert", id)))
}

pub async fn get_entry(conn: &mut SqliteConnection, entry_id: i64) -> Result<Option<QueueEntry>> {
    let sql = format!("SELECT {} FROM queue_entries WHERE id = ?", ENTRY_COLUMNS);
    Ok(sqlx::query_as::<_, QueueEntry>(&sql)
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// The operator's waiting entry, if any
pub async fn get_waiting_for_operator(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
) -> Result<Option<QueueEntry>> {
    let sql = format!(
        "SELECT {} FROM queue_entries WHERE operator_id = ? AND status = 'waiting'",
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, QueueEntry>(&sql)
        .bind(operator_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// Move every waiting entry past its TTL to `expired`
pub async fn expire_entries(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<OperatorId>> {
    let expired: Vec<OperatorId> = sqlx::query_scalar(
        r#"
        UPDATE queue_entries
        SET status = 'expired', claim_token = NULL, claimed_until = NULL, updated_at = ?
        WHERE status = 'waiting' AND expires_at <= ?
        RETURNING operator_id
        "#,
    )
    .bind(now)
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;
    Ok(expired)
}

/// Unexpired waiting entries in service order
pub async fn list_waiting(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
    let sql = format!(
        r#"
        SELECT {} FROM queue_entries
        WHERE status = 'waiting' AND expires_at > ?
        ORDER BY priority DESC, created_at ASC, id ASC
        "#,
        ENTRY_COLUMNS
    );
    Ok(sqlx::query_as::<_, QueueEntry>(&sql)
        .bind(now)
        .fetch_all(&mut *conn)
        .await?)
}

/// Claim a waiting entry for `lease_until`. Returns false when the entry is no
/// longer waiting or another claimant holds a live lease.
pub async fn claim_entry(
    conn: &mut SqliteConnection,
    entry_id: i64,
    token: &str,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_entries
        SET claim_token = ?, claimed_until = ?, updated_at = ?
        WHERE id = ?
          AND status = 'waiting'
          AND (claimed_until IS NULL OR claimed_until < ?)
        "#,
    )
    .bind(token)
    .bind(lease_until)
    .bind(now)
    .bind(entry_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Drop a claim we still hold
pub async fn release_claim(conn: &mut SqliteConnection, entry_id: i64, token: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE queue_entries SET claim_token = NULL, claimed_until = NULL
        WHERE id = ? AND claim_token = ?
        "#,
    )
    .bind(entry_id)
    .bind(token)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mark the operator's waiting entry as served by `line_id`
pub async fn mark_assigned(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    line_id: LineId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_entries
        SET status = 'assigned', assigned_line_id = ?, claim_token = NULL, claimed_until = NULL, updated_at = ?
        WHERE operator_id = ? AND status = 'waiting'
        "#,
    )
    .bind(line_id)
    .bind(now)
    .bind(operator_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Withdraw the operator's waiting entry
pub async fn withdraw(conn: &mut SqliteConnection, operator_id: OperatorId, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_entries
        SET status = ?, claim_token = NULL, claimed_until = NULL, updated_at = ?
        WHERE operator_id = ? AND status = 'waiting'
        "#,
    )
    .bind(QueueStatus::Withdrawn)
    .bind(now)
    .bind(operator_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Number of unexpired waiting entries strictly ahead of `entry`
pub async fn count_ahead(conn: &mut SqliteConnection, entry: &QueueEntry, now: DateTime<Utc>) -> Result<usize> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM queue_entries
        WHERE status = 'waiting' AND expires_at > ?
          AND (priority > ?
               OR (priority = ? AND created_at < ?)
               OR (priority = ? AND created_at = ? AND id < ?))
        "#,
    )
    .bind(now)
    .bind(entry.priority)
    .bind(entry.priority)
    .bind(entry.created_at)
    .bind(entry.priority)
    .bind(entry.created_at)
    .bind(entry.id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count.max(0) as usize)
}

/// Whether anyone other than `excluding` is waiting in `segment` or in the
/// global (unsegmented) queue
pub async fn has_waiting(
    conn: &mut SqliteConnection,
    segment: Option<SegmentId>,
    excluding: Option<OperatorId>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM queue_entries
        WHERE status = 'waiting' AND expires_at > ?
          AND (segment_id IS NULL OR segment_id = ?)
          AND (? IS NULL OR operator_id != ?)
        "#,
    )
    .bind(now)
    .bind(segment)
    .bind(excluding)
    .bind(excluding)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

pub async fn waiting_by_segment(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<SegmentDepth>> {
    Ok(sqlx::query_as::<_, SegmentDepth>(
        r#"
        SELECT segment_id, COUNT(*) AS waiting FROM queue_entries
        WHERE status = 'waiting' AND expires_at > ?
        GROUP BY segment_id
        ORDER BY segment_id
        "#,
    )
    .bind(now)
    .fetch_all(&mut *conn)
    .await?)
}

/// Creation time of the oldest unexpired waiting entry
pub async fn oldest_waiting(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        SELECT created_at FROM queue_entries
        WHERE status = 'waiting' AND expires_at > ?
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(oldest)
}
