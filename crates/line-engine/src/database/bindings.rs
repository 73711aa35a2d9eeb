//! Line ↔ operator binding operations

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::Result;
use crate::line::Line;
use crate::operator::Operator;
use crate::types::{LineId, OperatorId, SegmentId};

pub async fn insert_binding(
    conn: &mut SqliteConnection,
    line_id: LineId,
    operator_id: OperatorId,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO line_operators (line_id, operator_id, created_at) VALUES (?, ?, ?)")
        .bind(line_id)
        .bind(operator_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_binding(conn: &mut SqliteConnection, line_id: LineId, operator_id: OperatorId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM line_operators WHERE line_id = ? AND operator_id = ?")
        .bind(line_id)
        .bind(operator_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every binding on a line, returning the operators that were bound
pub async fn delete_bindings_for_line(conn: &mut SqliteConnection, line_id: LineId) -> Result<Vec<OperatorId>> {
    let mut operators: Vec<OperatorId> = sqlx::query_scalar(
        "DELETE FROM line_operators WHERE line_id = ? RETURNING operator_id",
    )
    .bind(line_id)
    .fetch_all(&mut *conn)
    .await?;

    operators.sort();
    Ok(operators)
}

pub async fn is_bound(conn: &mut SqliteConnection, line_id: LineId, operator_id: OperatorId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM line_operators WHERE line_id = ? AND operator_id = ?",
    )
    .bind(line_id)
    .bind(operator_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

pub async fn count_bindings(conn: &mut SqliteConnection, line_id: LineId) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM line_operators WHERE line_id = ?")
        .bind(line_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as usize)
}

/// Operators bound to a line, in binding order
pub async fn bound_operators(conn: &mut SqliteConnection, line_id: LineId) -> Result<Vec<Operator>> {
    Ok(sqlx::query_as::<_, Operator>(
        r#"
        SELECT o.id, o.name, o.role, o.segment_id, o.online_status, o.current_line_id,
               o.last_status_change, o.created_at, o.updated_at
        FROM line_operators lo
        JOIN operators o ON o.id = lo.operator_id
        WHERE lo.line_id = ?
        ORDER BY lo.created_at ASC, o.id ASC
        "#,
    )
    .bind(line_id)
    .fetch_all(&mut *conn)
    .await?)
}

/// Lines an operator is bound to, in binding order
pub async fn lines_for_operator(conn: &mut SqliteConnection, operator_id: OperatorId) -> Result<Vec<Line>> {
    Ok(sqlx::query_as::<_, Line>(
        r#"
        SELECT l.id, l.phone, l.status, l.segment_id, l.is_reserve, l.provider_ref,
               l.instance_name, l.primary_operator_id, l.created_at, l.updated_at
        FROM line_operators lo
        JOIN lines l ON l.id = lo.line_id
        WHERE lo.operator_id = ?
        ORDER BY lo.created_at ASC, l.id ASC
        "#,
    )
    .bind(operator_id)
    .fetch_all(&mut *conn)
    .await?)
}

/// `(line, operator segment)` for every binding, used to check segment mixing in bulk
pub async fn list_bound_segments(conn: &mut SqliteConnection) -> Result<Vec<(LineId, Option<SegmentId>)>> {
    Ok(sqlx::query_as::<_, (LineId, Option<SegmentId>)>(
        r#"
        SELECT lo.line_id, o.segment_id
        FROM line_operators lo
        JOIN operators o ON o.id = lo.operator_id
        ORDER BY lo.line_id, lo.created_at
        "#,
    )
    .fetch_all(&mut *conn)
    .await?)
}
