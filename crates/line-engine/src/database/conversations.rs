//! Conversation and message log records
//!
//! The engine does not own conversations; it only reads how busy a line is
//! and re-points or closes open conversations when an operator loses or
//! switches a line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::{LineEngineError, Result};
use crate::types::{LineId, OperatorId};

/// Conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Finalized,
    Closed,
}

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    pub contact_phone: String,
    pub operator_id: Option<OperatorId>,
    pub line_id: Option<LineId>,
    pub status: ConversationStatus,
    /// Closing code; set to the abandoned sentinel when a line is lost
    pub tabulation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const CONVERSATION_COLUMNS: &str =
    "id, contact_phone, operator_id, line_id, status, tabulation, created_at, updated_at";

pub async fn insert_conversation(
    conn: &mut SqliteConnection,
    contact_phone: &str,
    operator_id: OperatorId,
    line_id: LineId,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO conversations (contact_phone, operator_id, line_id, status, created_at, updated_at)
        VALUES (?, ?, ?, 'open', ?, ?)
        RETURNING id
        "#,
    )
    .bind(contact_phone)
    .bind(operator_id)
    .bind(line_id)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    get_conversation(conn, id)
        .await?
        .ok_or_else(|| LineEngineError::internal(format!("conversation {} vanished after insert", id)))
}

pub async fn get_conversation(conn: &mut SqliteConnection, conversation_id: i64) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?", CONVERSATION_COLUMNS);
    Ok(sqlx::query_as::<_, Conversation>(&sql)
        .bind(conversation_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// The contact's most recent open conversation on a line
pub async fn find_open_for_contact(
    conn: &mut SqliteConnection,
    contact_phone: &str,
    line_id: LineId,
) -> Result<Option<Conversation>> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE contact_phone = ? AND line_id = ? AND status = 'open' \
         ORDER BY id DESC LIMIT 1",
        CONVERSATION_COLUMNS
    );
    Ok(sqlx::query_as::<_, Conversation>(&sql)
        .bind(contact_phone)
        .bind(line_id)
        .fetch_optional(&mut *conn)
        .await?)
}

pub async fn count_open_for_line(conn: &mut SqliteConnection, line_id: LineId) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE line_id = ? AND status = 'open'")
        .bind(line_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as usize)
}

pub async fn count_open_for_operator(conn: &mut SqliteConnection, operator_id: OperatorId) -> Result<usize> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE operator_id = ? AND status = 'open'")
            .bind(operator_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count.max(0) as usize)
}

/// Move the operator's open conversations from one line to another
pub async fn repoint_open(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    from_line: LineId,
    to_line: LineId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE conversations SET line_id = ?, updated_at = ?
        WHERE operator_id = ? AND line_id = ? AND status = 'open'
        "#,
    )
    .bind(to_line)
    .bind(now)
    .bind(operator_id)
    .bind(from_line)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Close the operator's open conversations on a line with `tabulation`
pub async fn close_open(
    conn: &mut SqliteConnection,
    operator_id: OperatorId,
    line_id: LineId,
    tabulation: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE conversations SET status = 'closed', tabulation = ?, updated_at = ?
        WHERE operator_id = ? AND line_id = ? AND status = 'open'
        "#,
    )
    .bind(tabulation)
    .bind(now)
    .bind(operator_id)
    .bind(line_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn log_message(
    conn: &mut SqliteConnection,
    line_id: LineId,
    conversation_id: Option<i64>,
    direction: MessageDirection,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO message_log (line_id, conversation_id, direction, created_at) VALUES (?, ?, ?, ?)")
        .bind(line_id)
        .bind(conversation_id)
        .bind(direction)
        .bind(at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn count_messages_since(
    conn: &mut SqliteConnection,
    line_id: LineId,
    since: DateTime<Utc>,
) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_log WHERE line_id = ? AND created_at >= ?")
        .bind(line_id)
        .bind(since)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as usize)
}
