//! # Service Item Repository
//!
//! Database operations for menu/service items.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use bazaar_core::{ServiceItem, Station};

/// Columns selected for every service item read.
const SERVICE_ITEM_COLUMNS: &str = r#"
    id, name, station, selling_price_cents,
    linked_product_id, is_active, created_at, updated_at
"#;

/// Repository for service item database operations.
#[derive(Debug, Clone)]
pub struct ServiceItemRepository {
    pool: SqlitePool,
}

impl ServiceItemRepository {
    /// Creates a new ServiceItemRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ServiceItemRepository { pool }
    }

    /// Gets a service item by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ServiceItem>> {
        let sql = format!("SELECT {SERVICE_ITEM_COLUMNS} FROM service_items WHERE id = ?1");

        let item = sqlx::query_as::<_, ServiceItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Lists active service items sorted by name.
    pub async fn list_active(&self) -> DbResult<Vec<ServiceItem>> {
        let sql = format!(
            "SELECT {SERVICE_ITEM_COLUMNS} FROM service_items WHERE is_active = 1 ORDER BY name"
        );

        let items = sqlx::query_as::<_, ServiceItem>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Lists active service items routed to a station.
    pub async fn list_by_station(&self, station: Station) -> DbResult<Vec<ServiceItem>> {
        let sql = format!(
            r#"
            SELECT {SERVICE_ITEM_COLUMNS} FROM service_items
            WHERE is_active = 1 AND station = ?1
            ORDER BY name
            "#
        );

        let items = sqlx::query_as::<_, ServiceItem>(&sql)
            .bind(station)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Inserts a new service item.
    pub async fn insert(&self, item: &ServiceItem) -> DbResult<ServiceItem> {
        debug!(name = %item.name, "Inserting service item");

        sqlx::query(
            r#"
            INSERT INTO service_items (
                id, name, station, selling_price_cents,
                linked_product_id, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.station)
        .bind(item.selling_price_cents)
        .bind(&item.linked_product_id)
        .bind(item.is_active)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(item.clone())
    }

    /// Updates an existing service item.
    pub async fn update(&self, item: &ServiceItem) -> DbResult<()> {
        debug!(id = %item.id, "Updating service item");

        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE service_items SET
                name = ?2,
                station = ?3,
                selling_price_cents = ?4,
                linked_product_id = ?5,
                is_active = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.station)
        .bind(item.selling_price_cents)
        .bind(&item.linked_product_id)
        .bind(item.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Service item", &item.id));
        }

        Ok(())
    }

    /// Soft-deletes a service item.
    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Soft-deleting service item");

        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE service_items SET is_active = 0, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Service item", id));
        }

        Ok(())
    }
}

/// Helper to generate a new service item ID.
pub fn generate_service_item_id() -> String {
    Uuid::new_v4().to_string()
}
