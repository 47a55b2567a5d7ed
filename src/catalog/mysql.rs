//! MySQL catalog
//!
//! Schema is bootstrapped on startup so a fresh database works without a
//! separate migration step.

use super::{CameraAdjustment, CameraCatalog, CameraRecord, NewCamera};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

/// Catalog backed by a MySQL pool
pub struct MySqlCatalog {
    pool: MySqlPool,
}

/// Flat row shape; nesting into `CameraRecord` happens in [`Self::to_record`]
#[derive(sqlx::FromRow)]
struct CameraRow {
    id: u64,
    name: String,
    ip: String,
    port: u16,
    crop_x: u64,
    crop_y: u64,
    crop_w: f64,
    crop_h: f64,
    adjustment_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl MySqlCatalog {
    /// Create the catalog and ensure the schema exists
    pub async fn new(pool: MySqlPool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cameras (
                id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                ip VARCHAR(64) NOT NULL UNIQUE,
                port SMALLINT UNSIGNED NOT NULL,
                crop_x BIGINT UNSIGNED NOT NULL DEFAULT 0,
                crop_y BIGINT UNSIGNED NOT NULL DEFAULT 0,
                crop_w DOUBLE NOT NULL DEFAULT 0,
                crop_h DOUBLE NOT NULL DEFAULT 0,
                adjustment_updated_at DATETIME(3) NULL,
                created_at DATETIME(3) NOT NULL,
                modified_at DATETIME(3) NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn to_record(row: CameraRow) -> CameraRecord {
        CameraRecord {
            id: row.id,
            name: row.name,
            ip: row.ip,
            port: row.port,
            created_at: row.created_at,
            modified_at: row.modified_at,
            adjustment: Some(CameraAdjustment {
                crop_x: row.crop_x,
                crop_y: row.crop_y,
                crop_w: row.crop_w,
                crop_h: row.crop_h,
                updated_at: row.adjustment_updated_at,
            }),
        }
    }

    const SELECT_COLUMNS: &'static str = "id, name, ip, port, crop_x, crop_y, crop_w, crop_h, \
         adjustment_updated_at, created_at, modified_at";
}

#[async_trait]
impl CameraCatalog for MySqlCatalog {
    async fn roster(&self, limit: Option<u64>) -> Result<Vec<CameraRecord>> {
        let query = format!(
            "SELECT {} FROM cameras ORDER BY id LIMIT ?",
            Self::SELECT_COLUMNS
        );
        let rows: Vec<CameraRow> = sqlx::query_as(&query)
            .bind(limit.unwrap_or(u64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Self::to_record).collect())
    }

    async fn insert(&self, camera: NewCamera) -> Result<CameraRecord> {
        camera.validate()?;

        let existing: Option<(u64,)> = sqlx::query_as("SELECT id FROM cameras WHERE ip = ?")
            .bind(&camera.ip)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict(format!(
                "camera entry with IP '{}' already exists",
                camera.ip
            )));
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO cameras (name, ip, port, adjustment_updated_at, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&camera.name)
        .bind(&camera.ip)
        .bind(camera.port)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(CameraRecord {
            id: result.last_insert_id(),
            name: camera.name,
            ip: camera.ip,
            port: camera.port,
            created_at: now,
            modified_at: now,
            adjustment: Some(CameraAdjustment {
                updated_at: Some(now),
                ..CameraAdjustment::default()
            }),
        })
    }

    async fn remove(&self, ip: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM cameras WHERE ip = ?")
            .bind(ip)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "camera entry with IP '{}' not found",
                ip
            )));
        }
        Ok(())
    }
}
