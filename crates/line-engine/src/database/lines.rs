//! Line table operations

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{LineEngineError, Result};
use crate::line::{Line, LineStatus, NewLine};
use crate::types::{LineId, OperatorId, SegmentId};

const LINE_COLUMNS: &str = "l.id, l.phone, l.status, l.segment_id, l.is_reserve, l.provider_ref, \
     l.instance_name, l.primary_operator_id, l.created_at, l.updated_at";

/// A line together with its current binding count
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LineOccupancy {
    #[sqlx(flatten)]
    pub line: Line,
    pub bound_count: i64,
}

impl LineOccupancy {
    pub fn bound(&self) -> usize {
        self.bound_count.max(0) as usize
    }
}

/// Insert a new line and return the stored record
pub async fn insert_line(conn: &mut SqliteConnection, new_line: &NewLine, now: DateTime<Utc>) -> Result<Line> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO lines (phone, status, segment_id, is_reserve, provider_ref, instance_name, created_at, updated_at)
        VALUES (?, 'active', ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&new_line.phone)
    .bind(new_line.segment_id)
    .bind(new_line.is_reserve)
    .bind(&new_line.provider_ref)
    .bind(&new_line.instance_name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!("📱 Inserted line {} ({})", id, new_line.phone);
    fetch_line(conn, LineId(id)).await
}

pub async fn get_line(conn: &mut SqliteConnection, line_id: LineId) -> Result<Option<Line>> {
    let sql = format!("SELECT {} FROM lines l WHERE l.id = ?", LINE_COLUMNS);
    Ok(sqlx::query_as::<_, Line>(&sql)
        .bind(line_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// Like [`get_line`] but a missing row is `NotFound`
pub async fn fetch_line(conn: &mut SqliteConnection, line_id: LineId) -> Result<Line> {
    get_line(conn, line_id)
        .await?
        .ok_or_else(|| LineEngineError::not_found(format!("line {}", line_id)))
}

pub async fn list_lines(conn: &mut SqliteConnection) -> Result<Vec<Line>> {
    let sql = format!("SELECT {} FROM lines l ORDER BY l.id", LINE_COLUMNS);
    Ok(sqlx::query_as::<_, Line>(&sql).fetch_all(&mut *conn).await?)
}

pub async fn list_lines_by_status(conn: &mut SqliteConnection, status: LineStatus) -> Result<Vec<Line>> {
    let sql = format!("SELECT {} FROM lines l WHERE l.status = ? ORDER BY l.id", LINE_COLUMNS);
    Ok(sqlx::query_as::<_, Line>(&sql)
        .bind(status)
        .fetch_all(&mut *conn)
        .await?)
}

/// Every line that is not banned, for the full health sweep
pub async fn list_unbanned_lines(conn: &mut SqliteConnection) -> Result<Vec<Line>> {
    let sql = format!("SELECT {} FROM lines l WHERE l.status != 'ban' ORDER BY l.id", LINE_COLUMNS);
    Ok(sqlx::query_as::<_, Line>(&sql).fetch_all(&mut *conn).await?)
}

/// Active lines with their binding counts, least-bound first then lowest id
pub async fn list_active_occupancy(conn: &mut SqliteConnection) -> Result<Vec<LineOccupancy>> {
    let sql = format!(
        r#"
        SELECT {},
               (SELECT COUNT(*) FROM line_operators lo WHERE lo.line_id = l.id) AS bound_count
        FROM lines l
        WHERE l.status = 'active'
        ORDER BY bound_count ASC, l.id ASC
        "#,
        LINE_COLUMNS
    );
    Ok(sqlx::query_as::<_, LineOccupancy>(&sql).fetch_all(&mut *conn).await?)
}

/// Take the write lock on a line row.
///
/// SQLite upgrades the transaction to a writer on the first write, so doing
/// this before reading capacity serializes concurrent assigners on the line.
/// Returns false when the line does not exist.
pub async fn lock_line(conn: &mut SqliteConnection, line_id: LineId, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query("UPDATE lines SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    line_id: LineId,
    status: LineStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE lines SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Permanently scope a line to a segment
pub async fn promote_segment(
    conn: &mut SqliteConnection,
    line_id: LineId,
    segment: SegmentId,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE lines SET segment_id = ?, updated_at = ? WHERE id = ?")
        .bind(segment)
        .bind(now)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_primary_operator(
    conn: &mut SqliteConnection,
    line_id: LineId,
    operator_id: Option<OperatorId>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE lines SET primary_operator_id = ?, updated_at = ? WHERE id = ?")
        .bind(operator_id)
        .bind(now)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_line(conn: &mut SqliteConnection, line_id: LineId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM lines WHERE id = ?")
        .bind(line_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
