//! Postgres-backed stores.
//!
//! Tables are created by [`ensure_schema`]. Sales and their line items are
//! written in one transaction; product updates are single-row overwrites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use watchstore_core::{EmployeeId, ProductId, SaleId};
use watchstore_products::Product;
use watchstore_sales::{Sale, SaleLineItem};

use super::{LineItemLedger, ProductStore, SaleStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        price BIGINT NOT NULL CHECK (price >= 0),
        quantity INTEGER NOT NULL CHECK (quantity >= 0),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales (
        id UUID PRIMARY KEY,
        employee_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sale_products (
        sale_id UUID NOT NULL REFERENCES sales (id),
        line_no INTEGER NOT NULL,
        product_id UUID NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity >= 1),
        PRIMARY KEY (sale_id, line_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sale_line_applications (
        sale_id UUID NOT NULL,
        line_no INTEGER NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (sale_id, line_no)
    )
    "#,
];

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    info!(max_connections, "connected to postgres");
    Ok(pool)
}

/// Create missing tables. Safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("schema ensured");
    Ok(())
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidValue(format!("{field} out of range: {value}")))
}

fn to_i32(value: u32, field: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::InvalidValue(format!("{field} out of range: {value}")))
}

fn from_i64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidValue(format!("negative {field}: {value}")))
}

fn from_i32(value: i32, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidValue(format!("negative {field}: {value}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: from_i64(row.try_get("price")?, "price")?,
        quantity: from_i32(row.try_get("quantity")?, "quantity")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn insert(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(to_i64(product.price, "price")?)
        .bind(to_i32(product.quantity, "quantity")?)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, price, quantity, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, price, quantity, created_at, updated_at
            FROM products
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }

    async fn update(&self, product: &Product) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, description = $3, price = $4, quantity = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(to_i64(product.price, "price")?)
        .bind(to_i32(product.quantity, "quantity")?)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, id: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresSaleStore {
    pool: PgPool,
}

impl PostgresSaleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SaleStore for PostgresSaleStore {
    async fn insert(&self, sale: &Sale) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO sales (id, employee_id, created_at) VALUES ($1, $2, $3)")
            .bind(sale.id.as_uuid())
            .bind(sale.employee_id.as_uuid())
            .bind(sale.created_at)
            .execute(&mut *tx)
            .await?;

        for (line_no, item) in sale.items.iter().enumerate() {
            let line_no = i32::try_from(line_no)
                .map_err(|_| StoreError::InvalidValue(format!("too many line items: {line_no}")))?;
            sqlx::query(
                r#"
                INSERT INTO sale_products (sale_id, line_no, product_id, quantity)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(sale.id.as_uuid())
            .bind(line_no)
            .bind(item.product_id.as_uuid())
            .bind(to_i32(item.quantity, "quantity")?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        let Some(row) = sqlx::query("SELECT id, employee_id, created_at FROM sales WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let lines = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM sale_products
            WHERE sale_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let items = lines
            .iter()
            .map(|r| {
                Ok(SaleLineItem {
                    product_id: ProductId::from_uuid(r.try_get::<Uuid, _>("product_id")?),
                    quantity: from_i32(r.try_get("quantity")?, "quantity")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(Sale {
            id: SaleId::from_uuid(row.try_get::<Uuid, _>("id")?),
            employee_id: EmployeeId::from_uuid(row.try_get::<Uuid, _>("employee_id")?),
            items,
            created_at: row.try_get("created_at")?,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresLineItemLedger {
    pool: PgPool,
}

impl PostgresLineItemLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LineItemLedger for PostgresLineItemLedger {
    async fn is_applied(&self, sale_id: SaleId, line_no: u32) -> Result<bool, StoreError> {
        let applied: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sale_line_applications WHERE sale_id = $1 AND line_no = $2
            )
            "#,
        )
        .bind(sale_id.as_uuid())
        .bind(to_i32(line_no, "line_no")?)
        .fetch_one(&self.pool)
        .await?;
        Ok(applied)
    }

    async fn mark_applied(&self, sale_id: SaleId, line_no: u32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sale_line_applications (sale_id, line_no)
            VALUES ($1, $2)
            ON CONFLICT (sale_id, line_no) DO NOTHING
            "#,
        )
        .bind(sale_id.as_uuid())
        .bind(to_i32(line_no, "line_no")?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
