//! # Line Engine Database
//!
//! SQLite persistence for lines, operators, bindings, the waiting queue,
//! sticky contact bindings, and the conversation records the engine
//! re-points when a line is lost or switched.
//!
//! ## Transactions
//!
//! SQLite transactions are serializable. Every mutating flow in the engine:
//!
//! 1. begins a transaction with [`LineDatabase::begin`],
//! 2. takes the write lock up front by touching the row it is about to
//!    mutate (see [`lines::lock_line`]),
//! 3. reads, validates and writes through the same `&mut SqliteConnection`,
//! 4. commits.
//!
//! The whole flow is bounded by [`LineDatabase::with_timeout`]; dropping the
//! future on timeout drops the transaction, which rolls it back.
//!
//! Query helpers in the submodules take `&mut SqliteConnection` so they can
//! run either inside a transaction (`&mut *tx`) or on a pooled connection
//! (`&mut *conn`). Never acquire a second connection while holding a
//! transaction: in-memory stores run with a single connection.

pub mod bindings;
pub mod contacts;
pub mod conversations;
pub mod lines;
pub mod operators;
pub mod queue;
pub mod schema;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::error::{LineEngineError, Result};

/// Line engine database handle
#[derive(Clone)]
pub struct LineDatabase {
    pool: SqlitePool,
    transaction_timeout: Duration,
}

impl LineDatabase {
    /// Open (and migrate) the database described by `config`
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("🗄️ Opening line engine database at: {}", config.database_url);

        let mut options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        let pool_options = if config.is_in_memory() {
            // Every connection to `:memory:` is its own database: keep exactly one alive forever
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.transaction_timeout())
            .connect_with(options)
            .await?;

        let database = Self {
            pool,
            transaction_timeout: config.transaction_timeout(),
        };

        database.initialize_schema().await?;

        info!("✅ Line engine database initialized successfully");
        Ok(database)
    }

    /// Create in-memory database for testing
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(&DatabaseConfig {
            database_url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("📋 Creating line engine database schema");

        let mut conn = self.acquire().await?;
        schema::create_lines_table(&mut conn).await?;
        schema::create_operators_table(&mut conn).await?;
        schema::create_line_operators_table(&mut conn).await?;
        schema::create_queue_entries_table(&mut conn).await?;
        schema::create_contact_bindings_table(&mut conn).await?;
        schema::create_conversations_table(&mut conn).await?;
        schema::create_message_log_table(&mut conn).await?;
        schema::create_indexes(&mut conn).await?;

        debug!("✅ Database schema created successfully");
        Ok(())
    }

    /// Underlying pool, for collaborators sharing the same store
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a pooled connection for reads or single-statement writes
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Begin a transaction
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Upper bound applied to every mutating flow
    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    /// Run `fut` under the transaction deadline.
    ///
    /// On expiry the future (and any transaction it owns) is dropped and the
    /// caller gets `TransactionTimeout`; nothing is retried here.
    pub async fn with_timeout<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.transaction_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LineEngineError::TransactionTimeout(format!(
                "{} exceeded {:?}",
                operation, self.transaction_timeout
            ))),
        }
    }

    /// Execute a health check query
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => {
                debug!("💚 Database health check passed");
                Ok(true)
            }
            Err(e) => {
                error!("❌ Database health check failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
