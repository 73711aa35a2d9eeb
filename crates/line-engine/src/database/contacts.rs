//! Sticky contact binding operations

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::Result;
use crate::routing::ContactBinding;
use crate::types::{LineId, OperatorId};

pub async fn get_binding(
    conn: &mut SqliteConnection,
    contact_phone: &str,
    line_id: LineId,
) -> Result<Option<ContactBinding>> {
    Ok(sqlx::query_as::<_, ContactBinding>(
        r#"
        SELECT contact_phone, line_id, operator_id, expires_at, created_at, updated_at
        FROM contact_bindings
        WHERE contact_phone = ? AND line_id = ?
        "#,
    )
    .bind(contact_phone)
    .bind(line_id)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Create or overwrite the binding for `(contact_phone, line_id)`
pub async fn upsert_binding(
    conn: &mut SqliteConnection,
    contact_phone: &str,
    line_id: LineId,
    operator_id: OperatorId,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contact_bindings (contact_phone, line_id, operator_id, expires_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (contact_phone, line_id) DO UPDATE SET
            operator_id = excluded.operator_id,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(contact_phone)
    .bind(line_id)
    .bind(operator_id)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete every binding whose window has closed
pub async fn purge_expired(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM contact_bindings WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
