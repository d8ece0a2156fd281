//! Credit persistence.

pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::models::{CreditRecord, IngestionRecord};

pub use postgres::PgCreditStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("credit {0} not found")]
    NotFound(i64),
}

impl StoreError {
    /// Whether retrying the same write can never succeed.
    ///
    /// PostgreSQL data exceptions (SQLSTATE class 22) and integrity
    /// violations (class 23) depend only on the row. Everything else,
    /// including pool and connection errors, may clear up on its own.
    pub fn is_permanent(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db
                .code()
                .map(|code| code.starts_with("22") || code.starts_with("23"))
                .unwrap_or(false),
            StoreError::Database(_) => false,
            StoreError::NotFound(_) => true,
        }
    }
}

/// Single-column lookups supported by the read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditFilter {
    CreditNumber(String),
    InvoiceNumber(String),
    CreditType(String),
    ConstitutionDate(NaiveDate),
    SimplifiedTaxRegime(bool),
}

impl CreditFilter {
    pub fn column(&self) -> &'static str {
        match self {
            CreditFilter::CreditNumber(_) => "numero_credito",
            CreditFilter::InvoiceNumber(_) => "numero_nfse",
            CreditFilter::CreditType(_) => "tipo_credito",
            CreditFilter::ConstitutionDate(_) => "data_constituicao",
            CreditFilter::SimplifiedTaxRegime(_) => "simples_nacional",
        }
    }
}

/// Storage used by the consumer and the read path.
///
/// `find` results are ordered by constitution date, newest first.
#[async_trait]
pub trait Store: Send + Sync {
    async fn add(&self, record: &IngestionRecord) -> Result<CreditRecord, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<CreditRecord>, StoreError>;

    async fn get_all(&self) -> Result<Vec<CreditRecord>, StoreError>;

    async fn update(&self, id: i64, record: &IngestionRecord) -> Result<CreditRecord, StoreError>;

    /// Returns `false` when nothing had that id.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    async fn find(&self, filter: &CreditFilter) -> Result<Vec<CreditRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    debug!(
        max_connections = config.max_connections,
        "Creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed successfully");
    Ok(())
}
