use crate::config::DatabaseConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// One uploaded original and its optional mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    /// Server-generated image id
    pub id: String,
    /// Storage key of the original
    pub original_key: String,
    /// Storage key of the latest mask
    pub mask_key: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last modified
    pub updated_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    /// A fresh record for an original that was just stored under `original_key`
    pub fn new(id: impl Into<String>, original_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_key: original_key.into(),
            mask_key: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Point the record at a newly stored mask
    pub fn set_mask_key(&mut self, mask_key: impl Into<String>) {
        self.mask_key = Some(mask_key.into());
        self.updated_at = Some(Utc::now());
    }
}

/// Persistence boundary for image records
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Create the images table if it does not exist
    async fn migrate(&self) -> Result<()>;

    /// Round trip to the database
    async fn health_check(&self) -> Result<()>;

    /// Insert a new record
    async fn insert(&self, record: &ImageRecord) -> Result<()>;

    /// Look a record up by id
    async fn find_by_id(&self, id: &str) -> Result<Option<ImageRecord>>;

    /// Persist `mask_key` and `updated_at` of an existing record
    async fn update(&self, record: &ImageRecord) -> Result<()>;
}

/// Open the store matching the scheme of `config.url`
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn ImageStore>> {
    let url = config.url.as_str();

    if url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteImageStore::new(config).await?))
    } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        Ok(Arc::new(PgImageStore::new(config).await?))
    } else {
        bail!("Unsupported database URL scheme: {}", url)
    }
}

/// SQLite-backed store, the default for local deployments
pub struct SqliteImageStore {
    pool: SqlitePool,
}

impl SqliteImageStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .context("Invalid SQLite connection URL")?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own copy
        let in_memory = config.url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        info!(url = %config.url, "Connected to SQLite database");

        Ok(Self { pool })
    }
}

#[async_trait]
impl ImageStore for SqliteImageStore {
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY NOT NULL,
                original_key TEXT NOT NULL,
                mask_key TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create images table")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(image_id = %record.id))]
    async fn insert(&self, record: &ImageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, original_key, mask_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.original_key)
        .bind(&record.mask_key)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert image record")?;

        debug!(original_key = %record.original_key, "Image record inserted");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, original_key, mask_key, created_at, updated_at
            FROM images
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query image record")?;

        Ok(record)
    }

    #[instrument(skip(self, record), fields(image_id = %record.id))]
    async fn update(&self, record: &ImageRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET mask_key = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.mask_key)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await
        .context("Failed to update image record")?;

        if result.rows_affected() == 0 {
            bail!("No image record with id {}", record.id);
        }

        debug!(mask_key = ?record.mask_key, "Image record updated");
        Ok(())
    }
}

/// PostgreSQL-backed store
pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }
}

#[async_trait]
impl ImageStore for PgImageStore {
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                original_key TEXT NOT NULL,
                mask_key TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create images table")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(image_id = %record.id))]
    async fn insert(&self, record: &ImageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, original_key, mask_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.id)
        .bind(&record.original_key)
        .bind(&record.mask_key)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert image record")?;

        debug!(original_key = %record.original_key, "Image record inserted");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, original_key, mask_key, created_at, updated_at
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query image record")?;

        Ok(record)
    }

    #[instrument(skip(self, record), fields(image_id = %record.id))]
    async fn update(&self, record: &ImageRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET mask_key = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(&record.mask_key)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await
        .context("Failed to update image record")?;

        if result.rows_affected() == 0 {
            bail!("No image record with id {}", record.id);
        }

        debug!(mask_key = ?record.mask_key, "Image record updated");
        Ok(())
    }
}
