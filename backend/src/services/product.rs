//! Product catalog service
//!
//! CRUD for the product catalog plus stock-aware read models: availability
//! (on-hand minus active reservations), low-stock alerts, expiring lots and
//! shade/caliber divergence warnings for tile products.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{PageMeta, Paginated, ReservationStatus};

/// Product catalog service
#[derive(Clone)]
pub struct ProductService {
    db: PgPool,
}

/// A catalog product
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product with aggregated stock figures
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductAvailability {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit: Option<String>,
    pub min_stock: Decimal,
    pub total_stock: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

/// Input for creating a product
#[derive(Debug, Deserialize)]
pub struct CreateProductInput {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Option<Decimal>,
}

/// Input for updating a product (partial)
#[derive(Debug, Deserialize)]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Option<Decimal>,
    pub active: Option<bool>,
}

/// Query filters for product listing
#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A lot close to its expiration date
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExpiringLot {
    pub lot_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub lot_number: String,
    pub quantity: Decimal,
    pub expiration_date: NaiveDate,
}

/// A product whose active lots differ in shade or caliber
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ShadeCaliberAlert {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub variant_count: i64,
}

impl ProductService {
    /// Create a new ProductService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a product; SKU must be unique
    pub async fn create(&self, input: CreateProductInput) -> AppResult<Product> {
        if input.sku.trim().is_empty() {
            return Err(AppError::Validation {
                field: "sku".to_string(),
                message: "SKU is required".to_string(),
                message_pt: "SKU é obrigatório".to_string(),
            });
        }
        if input.name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "name".to_string(),
                message: "Name is required".to_string(),
                message_pt: "Nome é obrigatório".to_string(),
            });
        }

        let taken =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM products WHERE sku = $1)")
                .bind(&input.sku)
                .fetch_one(&self.db)
                .await?;
        if taken {
            return Err(AppError::DuplicateDocument(format!(
                "Product with SKU {} already exists",
                input.sku
            )));
        }

        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (sku, name, description, unit, min_stock)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, sku, name, description, unit, min_stock, active, created_at, updated_at
            "#,
        )
        .bind(&input.sku)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.unit)
        .bind(input.min_stock.unwrap_or(Decimal::ZERO))
        .fetch_one(&self.db)
        .await?;

        tracing::info!(product_id = %product.id, sku = %product.sku, "Product created");

        Ok(product)
    }

    /// Partially update a product
    pub async fn update(&self, id: Uuid, input: UpdateProductInput) -> AppResult<Product> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET name = COALESCE($1, name),
                description = COALESCE($2, description),
                unit = COALESCE($3, unit),
                min_stock = COALESCE($4, min_stock),
                active = COALESCE($5, active),
                updated_at = NOW()
            WHERE id = $6
            RETURNING id, sku, name, description, unit, min_stock, active, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.unit)
        .bind(input.min_stock)
        .bind(input.active)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(product)
    }

    /// Deactivate a product, keeping its history and lots intact
    pub async fn soft_delete(&self, id: Uuid) -> AppResult<Product> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET active = FALSE, updated_at = NOW()
            WHERE id = $1
            RETURNING id, sku, name, description, unit, min_stock, active, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        tracing::info!(product_id = %id, "Product deactivated");

        Ok(product)
    }

    /// Get a product by id
    pub async fn get(&self, id: Uuid) -> AppResult<Product> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, description, unit, min_stock, active, created_at, updated_at
            FROM products WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(product)
    }

    /// List products with optional name/SKU search
    pub async fn list(&self, query: ListProductsQuery) -> AppResult<Paginated<Product>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 200);
        let offset = (page - 1) * limit;
        let search = query.search.map(|s| format!("%{}%", s));

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM products
            WHERE ($1::text IS NULL OR name ILIKE $1 OR sku ILIKE $1)
              AND ($2::boolean IS NULL OR active = $2)
            "#,
        )
        .bind(&search)
        .bind(query.active)
        .fetch_one(&self.db)
        .await?;

        let data = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, description, unit, min_stock, active, created_at, updated_at
            FROM products
            WHERE ($1::text IS NULL OR name ILIKE $1 OR sku ILIKE $1)
              AND ($2::boolean IS NULL OR active = $2)
            ORDER BY name ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&search)
        .bind(query.active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated {
            data,
            meta: PageMeta::new(total, page, limit),
        })
    }

    /// Availability per product: on-hand lots minus active reservations
    pub async fn availability(&self, id: Uuid) -> AppResult<ProductAvailability> {
        let availability = sqlx::query_as::<_, ProductAvailability>(
            r#"
            SELECT p.id, p.sku, p.name, p.unit, p.min_stock,
                   COALESCE(SUM(l.quantity), 0) AS total_stock,
                   COALESCE((
                       SELECT SUM(r.quantity) FROM stock_reservations r
                       JOIN stock_lots rl ON rl.id = r.lot_id
                       WHERE rl.product_id = p.id AND r.status = $2
                   ), 0) AS reserved,
                   COALESCE(SUM(l.quantity), 0) - COALESCE((
                       SELECT SUM(r.quantity) FROM stock_reservations r
                       JOIN stock_lots rl ON rl.id = r.lot_id
                       WHERE rl.product_id = p.id AND r.status = $2
                   ), 0) AS available
            FROM products p
            LEFT JOIN stock_lots l ON l.product_id = p.id AND l.quantity > 0
            WHERE p.id = $1
            GROUP BY p.id
            "#,
        )
        .bind(id)
        .bind(ReservationStatus::Active)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(availability)
    }

    /// Active products whose total stock fell below their minimum
    pub async fn low_stock(&self) -> AppResult<Vec<ProductAvailability>> {
        let alerts = sqlx::query_as::<_, ProductAvailability>(
            r#"
            SELECT p.id, p.sku, p.name, p.unit, p.min_stock,
                   COALESCE(SUM(l.quantity), 0) AS total_stock,
                   CAST(0 AS NUMERIC) AS reserved,
                   COALESCE(SUM(l.quantity), 0) AS available
            FROM products p
            LEFT JOIN stock_lots l ON l.product_id = p.id AND l.quantity > 0
            WHERE p.active = TRUE AND p.min_stock > 0
            GROUP BY p.id
            HAVING COALESCE(SUM(l.quantity), 0) < p.min_stock
            ORDER BY p.name ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(alerts)
    }

    /// Non-empty lots expiring within the given window
    pub async fn expiring_lots(&self, window_days: i64) -> AppResult<Vec<ExpiringLot>> {
        let lots = sqlx::query_as::<_, ExpiringLot>(
            r#"
            SELECT l.id AS lot_id, l.product_id, p.name AS product_name,
                   l.lot_number, l.quantity, l.expiration_date
            FROM stock_lots l
            JOIN products p ON p.id = l.product_id
            WHERE l.quantity > 0
              AND l.expiration_date IS NOT NULL
              AND l.expiration_date <= CURRENT_DATE + $1::int
            ORDER BY l.expiration_date ASC
            "#,
        )
        .bind(window_days as i32)
        .fetch_all(&self.db)
        .await?;

        Ok(lots)
    }

    /// Products holding stock across lots with differing shade/caliber.
    /// Mixing variants in one delivery is visually noticeable on tiles, so
    /// these products need attention when allocating.
    pub async fn shade_caliber_alerts(&self) -> AppResult<Vec<ShadeCaliberAlert>> {
        let alerts = sqlx::query_as::<_, ShadeCaliberAlert>(
            r#"
            SELECT l.product_id, p.name AS product_name, p.sku,
                   COUNT(DISTINCT (COALESCE(l.shade, ''), COALESCE(l.caliber, ''))) AS variant_count
            FROM stock_lots l
            JOIN products p ON p.id = l.product_id
            WHERE l.quantity > 0
            GROUP BY l.product_id, p.name, p.sku
            HAVING COUNT(DISTINCT (COALESCE(l.shade, ''), COALESCE(l.caliber, ''))) > 1
            ORDER BY p.name ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(alerts)
    }
}
