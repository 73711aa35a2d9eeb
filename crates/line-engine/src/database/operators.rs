//! Operator table operations

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{LineEngineError, Result};
use crate::operator::{NewOperator, OnlineStatus, Operator};
use crate::types::{LineId, OperatorId};

const OPERATOR_COLUMNS: &str = "o.id, o.name, o.role, o.segment_id, o.online_status, o.current_line_id, \
     o.last_status_change, o.created_at, o.updated_at";

pub async fn insert_operator(
    conn: &mut SqliteConnection,
    new_operator: &NewOperator,
    now: DateTime<Utc>,
) -> Result<Operator> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO operators (name, role, segment_id, online_status, last_status_change, created_at, updated_at)
        VALUES (?, ?, ?, 'offline', ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&new_operator.name)
    .bind(new_operator.role)
    .bind(new_operator.segment_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!("👤 Inserted operator {} ({})", id, new_operator.name);
    fetch_operator(conn, OperatorId(id)).await
}

pub async fn get_operator(conn: &mut SqliteConnection, operator_id: OperatorId) -> Result<Option<Operator>> {
    let sql = format!("SELECT {} FROM operators o WHERE o.id = ?", OPERATOR_COLUMNS);
    Ok(sqlx::query_as::<_, Operator>(&sql)
        .bind(operator_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// Like [`get_operator`] but a missing row is `NotFound`
pub async fn fetch_operator(conn: &mut SqliteConnection, operator_id: OperatorId) -> Result<Operator> {
    get_operator(conn, operator_id)
        .await?
        .ok_or_else(|| LineEngineError::not_found(format!("operator {}", operator_id)))
}

pub async fn list_operators(conn: &mut SqliteConnection) -> Result<Vec<Operator>> {
    let sql = format!("SELECT {} FROM operators o ORDER BY o.id", OPERATOR_COLUMNS);
    Ok(sqlx::query_as::<_, Operator>(&sql).fetch_all(&mut *conn).await?)
}

pub async fn list_online(conn: &mut SqliteConnection) -> Result<Vec<Operator>> {
    let sql = format!(
        "SELECT {} FROM operators o WHERE o.online_status = 'online' ORDER BY o.id",
        OPERATOR_COLUMNS
    );
    Ok(sqlx::query_as::<_, Operator>(&sql).fetch_all(&mut *conn).await?)
}

/// Offline operators that still hold at least one binding and went offline before `cutoff`
pub async fn list_idle_bound(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> Result<Vec<Operator>> {
    let sql = format!(
        r#"
        SELECT {} FROM operators o
        WHERE o.online_status = 'offline'
          AND o.last_status_change < ?
          AND EXISTS (SELECT 1 FROM line_operators lo WHERE lo.operator_id = o.id)
        ORDER BY o.id
        "#,
        OPERATOR_COLUMNS
    );
    Ok(sqlx::query_as::<_, Operator>(&sql)
        .bind(cutoff)
        .fetch_all(&mut *conn)
        .await?)
}

/// Flip online status; `last_status_change` only moves when the status actually changes
pub async fn set_online_status(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    status: OnlineStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE operators
        SET last_status_change = CASE WHEN online_status = ? THEN last_status_change ELSE ? END,
            online_status = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(now)
    .bind(status)
    .bind(now)
    .bind(operator_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_current_line(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    line_id: Option<LineId>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE operators SET current_line_id = ?, updated_at = ? WHERE id = ?")
        .bind(line_id)
        .bind(now)
        .bind(operator_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Point `current_line_id` at the operator's oldest remaining binding on an
/// active line, or clear it. Returns the new value.
pub async fn repair_current_line(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    now: DateTime<Utc>,
) -> Result<Option<LineId>> {
    let next: Option<LineId> = sqlx::query_scalar(
        r#"
        SELECT lo.line_id FROM line_operators lo
        JOIN lines l ON l.id = lo.line_id
        WHERE lo.operator_id = ? AND l.status = 'active'
        ORDER BY lo.created_at ASC, lo.line_id ASC
        LIMIT 1
        "#,
    )
    .bind(operator_id)
    .fetch_optional(&mut *conn)
    .await?;

    set_current_line(conn, operator_id, next, now).await?;
    Ok(next)
}
