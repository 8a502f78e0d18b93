use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use rand::Rng;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, SqlErr,
};
use sea_orm_migration::MigratorTrait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info};

/// Attempts given to a unit of work that keeps losing lock races.
pub const LOCK_RETRY_ATTEMPTS: u32 = 8;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("coupon_engine.db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection failed: {}", e);
        counter!("coupon_engine.db.connection_failures", 1);
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = migrations::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed successfully in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    pool.ping().await.map_err(ServiceError::DatabaseError)
}

/// `SELECT ... FOR UPDATE` is only emitted where the backend understands it.
/// On SQLite the same effect comes from writing to the row first, which takes
/// the database write lock before anything is read.
pub fn supports_row_locks<C: ConnectionTrait>(conn: &C) -> bool {
    conn.get_database_backend() != DbBackend::Sqlite
}

/// Errors worth retrying: lock waits and serialisation failures.
pub fn is_transient_lock_error(err: &DbErr) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    [
        "database is locked",
        "database table is locked",
        "could not serialize",
        "deadlock",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

pub fn is_lock_conflict(err: &ServiceError) -> bool {
    matches!(err, ServiceError::DatabaseError(db_err) if is_transient_lock_error(db_err))
}

/// Runs `unit` again while it fails with a transient lock error, sleeping a
/// jittered, growing delay in between. `unit` must begin and finish its own
/// transaction so every attempt starts from a fresh snapshot.
pub async fn retry_on_lock<T, F, Fut>(operation: &'static str, mut unit: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 1;
    loop {
        match unit().await {
            Err(err) if attempt < LOCK_RETRY_ATTEMPTS && is_lock_conflict(&err) => {
                let delay = lock_backoff(attempt);
                counter!("coupon_engine.db.lock_retry", 1);
                debug!(operation, attempt, ?delay, error = %err, "Retrying unit of work after lock conflict");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn lock_backoff(attempt: u32) -> Duration {
    let base = 10u64 << attempt.min(5);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

/// Message of a unique-constraint violation, if that is what `err` is.
pub fn unique_violation_message(err: &DbErr) -> Option<String> {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => Some(message),
        _ => None,
    }
}

/// Whether `err` is a duplicate generated coupon code.
///
/// Relies on how each backend words the violation: Postgres quotes the index
/// name ([`migrations::ISSUED_COUPON_CODE_INDEX`]), SQLite the qualified
/// column `issued_coupons.unique_code`.
pub fn is_code_collision(err: &DbErr) -> bool {
    unique_violation_message(err)
        .map(|message| names_code_index(&message))
        .unwrap_or(false)
}

fn names_code_index(message: &str) -> bool {
    message.contains(migrations::ISSUED_COUPON_CODE_INDEX)
        || message.contains("issued_coupons.unique_code")
}
