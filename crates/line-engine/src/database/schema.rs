//! Database schema definitions for the line engine
//!
//! Tables for lines, operators, line↔operator bindings, the waiting queue,
//! sticky contact bindings, conversations and the message log.
//!
//! Timestamps are RFC 3339 TEXT written by sqlx's chrono encoder, which sorts
//! lexicographically in time order.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::Result;

/// Create the lines table
pub async fn create_lines_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating lines table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phone TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'ban', 'disconnected')),
            segment_id INTEGER,
            is_reserve BOOLEAN NOT NULL DEFAULT false,
            provider_ref TEXT NOT NULL,
            instance_name TEXT NOT NULL,
            primary_operator_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (primary_operator_id) REFERENCES operators(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Lines table created");
    Ok(())
}

/// Create the operators table
pub async fn create_operators_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating operators table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'operator'
                CHECK (role IN ('admin', 'supervisor', 'operator')),
            segment_id INTEGER,
            online_status TEXT NOT NULL DEFAULT 'offline'
                CHECK (online_status IN ('online', 'offline')),
            current_line_id INTEGER,
            last_status_change TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (current_line_id) REFERENCES lines(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Operators table created");
    Ok(())
}

/// Create the line_operators (binding) table
pub async fn create_line_operators_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating line_operators table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS line_operators (
            line_id INTEGER NOT NULL,
            operator_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (line_id, operator_id),
            FOREIGN KEY (line_id) REFERENCES lines(id) ON DELETE CASCADE,
            FOREIGN KEY (operator_id) REFERENCES operators(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Line operators table created");
    Ok(())
}

/// Create the queue_entries table
pub async fn create_queue_entries_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating queue_entries table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operator_id INTEGER NOT NULL,
            segment_id INTEGER,
            priority INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'waiting'
                CHECK (status IN ('waiting', 'assigned', 'expired', 'withdrawn')),
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            assigned_line_id INTEGER,
            claim_token TEXT,
            claimed_until TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (operator_id) REFERENCES operators(id) ON DELETE CASCADE,
            FOREIGN KEY (assigned_line_id) REFERENCES lines(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Queue entries table created");
    Ok(())
}

/// Create the contact_bindings (sticky routing) table
pub async fn create_contact_bindings_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating contact_bindings table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contact_bindings (
            contact_phone TEXT NOT NULL,
            line_id INTEGER NOT NULL,
            operator_id INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (contact_phone, line_id),
            FOREIGN KEY (line_id) REFERENCES lines(id) ON DELETE CASCADE,
            FOREIGN KEY (operator_id) REFERENCES operators(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Contact bindings table created");
    Ok(())
}

/// Create the conversations table
pub async fn create_conversations_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating conversations table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_phone TEXT NOT NULL,
            operator_id INTEGER,
            line_id INTEGER,
            status TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'finalized', 'closed')),
            tabulation TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (operator_id) REFERENCES operators(id) ON DELETE SET NULL,
            FOREIGN KEY (line_id) REFERENCES lines(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Conversations table created");
    Ok(())
}

/// Create the message_log table
pub async fn create_message_log_table(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating message_log table");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            line_id INTEGER NOT NULL,
            conversation_id INTEGER,
            direction TEXT NOT NULL CHECK (direction IN ('inbound', 'outbound')),
            created_at TEXT NOT NULL,
            FOREIGN KEY (line_id) REFERENCES lines(id) ON DELETE CASCADE,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    debug!("✅ Message log table created");
    Ok(())
}

/// Create indexes
pub async fn create_indexes(conn: &mut SqliteConnection) -> Result<()> {
    debug!("📋 Creating database indexes");

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_lines_status_segment ON lines(status, segment_id)",
        "CREATE INDEX IF NOT EXISTS idx_line_operators_operator ON line_operators(operator_id)",
        "CREATE INDEX IF NOT EXISTS idx_operators_online ON operators(online_status)",
        // at most one waiting entry per operator
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_one_waiting ON queue_entries(operator_id) WHERE status = 'waiting'",
        "CREATE INDEX IF NOT EXISTS idx_queue_order ON queue_entries(status, priority DESC, created_at ASC, id ASC)",
        "CREATE INDEX IF NOT EXISTS idx_contact_bindings_expiry ON contact_bindings(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_conversations_line_status ON conversations(line_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_conversations_operator_status ON conversations(operator_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_message_log_line_time ON message_log(line_id, created_at)",
    ];

    for statement in indexes {
        sqlx::query(statement).execute(&mut *conn).await?;
    }

    debug!("✅ Database indexes created");
    Ok(())
}
