//! Product catalogue service

use sqlx::PgPool;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{CreateProductInput, Product, ProductRow, PRODUCT_COLUMNS};
use shared::{validate_product_code, PaginatedResponse, Pagination, PaginationMeta};

#[derive(Clone)]
pub struct ProductService {
    db: PgPool,
}

impl ProductService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a product with zero stock; stock only changes through movements
    pub async fn create_product(&self, input: CreateProductInput) -> AppResult<Product> {
        input.validate()?;
        validate_product_code(&input.code).map_err(|msg| AppError::Validation {
            field: "code".to_string(),
            message: msg.to_string(),
        })?;
        if input.unit_price.is_sign_negative() {
            return Err(AppError::Validation {
                field: "unit_price".to_string(),
                message: "Unit price must not be negative".to_string(),
            });
        }

        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            INSERT INTO products (code, name, unit_price, current_stock)
            VALUES ($1, $2, $3, 0)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(input.code.trim())
        .bind(input.name.trim())
        .bind(input.unit_price)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(product_id = %row.id, code = %row.code, "Product created");
        Ok(row.into())
    }

    pub async fn list_products(&self, pagination: Pagination) -> AppResult<PaginatedResponse<Product>> {
        let pagination = pagination.normalized();

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products")
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products ORDER BY code, created_at LIMIT $1 OFFSET $2",
            PRODUCT_COLUMNS
        ))
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse {
            data: rows.into_iter().map(Into::into).collect(),
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }
}
