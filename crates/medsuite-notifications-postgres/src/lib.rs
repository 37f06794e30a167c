//! PostgreSQL storage backend for MedSuite notifications
//!
//! Provides persistent storage for:
//!
//! - In-app notifications (`in_app_notification`)
//! - Pending outbound notifications (`notification_schedule`)
//!
//! Tables are created by [`schema::ensure_schema`]. A partial unique index
//! over `(recipient_id, notification_type, reference_type, reference_id,
//! channel) WHERE status = 'SCHEDULED'` backs the atomic insert-if-absent.
//!
//! # Example
//!
//! ```ignore
//! use medsuite_notifications_postgres::PostgresNotificationStorage;
//!
//! let storage = PostgresNotificationStorage::connect("postgres://localhost/medsuite").await?;
//! storage.ensure_schema().await?;
//!
//! let store = storage.notification_store();
//! let unread = store.unread_count(42).await?;
//! ```

pub mod adapters;
pub mod notification;
pub mod schedule;
pub mod schema;

use std::sync::Arc;

use medsuite_notifications::NotificationError;
use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use adapters::{PgNotificationStore, PgScheduleStore};
pub use notification::NotificationStorage;
pub use schedule::ScheduleStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during notification storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored column could not be mapped back to its type.
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a client error (4xx equivalent).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidInput(_))
    }

    /// Returns `true` if this is a server error (5xx equivalent).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Decode(_))
    }
}

impl From<StorageError> for NotificationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => NotificationError::NotFound(what),
            other => NotificationError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL Notification Storage
// =============================================================================

/// PostgreSQL storage backend for notifications.
///
/// Holds a connection pool and hands out the table-specific storage types
/// and the trait adapters used by the consumer and scheduler.
#[derive(Debug, Clone)]
pub struct PostgresNotificationStorage {
    pool: Arc<PgPool>,
}

impl PostgresNotificationStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new().connect(database_url).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Connect with an explicit pool size and acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create the tables and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        schema::ensure_schema(&self.pool).await
    }

    /// Round-trips a trivial query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> StorageResult<()> {
        sqlx_core::query::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn notifications(&self) -> NotificationStorage<'_> {
        NotificationStorage::new(&self.pool)
    }

    #[must_use]
    pub fn schedules(&self) -> ScheduleStorage<'_> {
        ScheduleStorage::new(&self.pool)
    }

    /// `NotificationStore` adapter owning the pool.
    #[must_use]
    pub fn notification_store(&self) -> PgNotificationStore {
        PgNotificationStore::new(Arc::clone(&self.pool))
    }

    /// `ScheduleStore` adapter owning the pool.
    #[must_use]
    pub fn schedule_store(&self) -> PgScheduleStore {
        PgScheduleStore::new(Arc::clone(&self.pool))
    }
}
