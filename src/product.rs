//! Product catalog read-path (§4.1 Product gate). Catalog management and
//! search are explicitly out of scope; this module only loads the fields
//! the admission path needs and short-circuits repeat reads with a TTL
//! cache, mirroring the local-cache pattern the matching engine uses to
//! keep hot symbol metadata off the durable store's critical path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cached::proc_macro::cached;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use crate::core_types::ProductId;
use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductStatus {
    Upcoming,
    OnSale,
    SoldOut,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub initial_stock: i64,
    pub current_stock: i64,
    pub sale_opens_at: DateTime<Utc>,
    pub version: i64,
}

impl Product {
    /// §4.1 step 1: `UPCOMING` if the sale has not opened, else `SOLD_OUT`
    /// if cached stock is exhausted, else `ON_SALE`.
    pub fn status_at(&self, now: DateTime<Utc>) -> ProductStatus {
        if now < self.sale_opens_at {
            ProductStatus::Upcoming
        } else if self.current_stock <= 0 {
            ProductStatus::SoldOut
        } else {
            ProductStatus::OnSale
        }
    }
}

#[async_trait]
pub trait ProductGateway: Send + Sync {
    async fn get(&self, product_id: ProductId) -> Result<Option<Product>, EngineError>;

    async fn create(
        &self,
        name: String,
        price: Decimal,
        initial_stock: i64,
        sale_opens_at: DateTime<Utc>,
    ) -> Result<Product, EngineError>;

    /// Called once per successful `TryAdmit` so the gate's own SOLD_OUT
    /// short-circuit (§4.1 step 1) stays live instead of permanently
    /// reflecting `initial_stock`. The Atomic Cache remains the source of
    /// truth for exactness; this only keeps the gate's fast-path estimate
    /// from going stale.
    async fn decrement_stock(&self, product_id: ProductId) -> Result<(), EngineError>;
}

pub struct PgProductGateway {
    pool: PgPool,
}

impl PgProductGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(pool: &PgPool, product_id: ProductId) -> Result<Option<Product>, EngineError> {
        let row = sqlx::query("SELECT * FROM products WHERE product_id = $1")
            .bind(product_id.inner())
            .fetch_optional(pool)
            .await?;

        Ok(row.map(|row| Product {
            product_id: ProductId(row.get("product_id")),
            name: row.get("name"),
            price: row.get("price"),
            initial_stock: row.get("initial_stock"),
            current_stock: row.get("current_stock"),
            sale_opens_at: row.get("sale_opens_at"),
            version: row.get("version"),
        }))
    }
}

// 5-second TTL cache for the product-gate short-circuit (§5's "Suspension
// points"). `get_cached` is a free function, not a method, because the
// `cached` macro generates a process-wide cache keyed only on its
// arguments.
#[cached(time = 5, key = "ProductId", convert = r#"{ product_id }"#, result = true)]
async fn get_cached(pool: PgPool, product_id: ProductId) -> Result<Option<Product>, EngineError> {
    PgProductGateway::load(&pool, product_id).await
}

#[async_trait]
impl ProductGateway for PgProductGateway {
    async fn get(&self, product_id: ProductId) -> Result<Option<Product>, EngineError> {
        get_cached(self.pool.clone(), product_id).await
    }

    async fn create(
        &self,
        name: String,
        price: Decimal,
        initial_stock: i64,
        sale_opens_at: DateTime<Utc>,
    ) -> Result<Product, EngineError> {
        let product_id = ProductId::new();
        sqlx::query(
            r#"
            INSERT INTO products (product_id, name, price, initial_stock, current_stock, sale_opens_at)
            VALUES ($1, $2, $3, $4, $4, $5)
            "#,
        )
        .bind(product_id.inner())
        .bind(&name)
        .bind(price)
        .bind(initial_stock)
        .bind(sale_opens_at)
        .execute(&self.pool)
        .await?;

        Ok(Product {
            product_id,
            name,
            price,
            initial_stock,
            current_stock: initial_stock,
            sale_opens_at,
            version: 0,
        })
    }

    async fn decrement_stock(&self, product_id: ProductId) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock - 1, updated_at = now()
            WHERE product_id = $1 AND current_stock > 0
            "#,
        )
        .bind(product_id.inner())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory gateway for tests, with no TTL short-circuit — scenario tests
/// want every mutation visible immediately.
#[derive(Default)]
pub struct FakeProductGateway {
    products: std::sync::Mutex<std::collections::HashMap<ProductId, Product>>,
}

impl FakeProductGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, product: Product) {
        self.products.lock().unwrap().insert(product.product_id, product);
    }
}

#[async_trait]
impl ProductGateway for FakeProductGateway {
    async fn get(&self, product_id: ProductId) -> Result<Option<Product>, EngineError> {
        Ok(self.products.lock().unwrap().get(&product_id).cloned())
    }

    async fn create(
        &self,
        name: String,
        price: Decimal,
        initial_stock: i64,
        sale_opens_at: DateTime<Utc>,
    ) -> Result<Product, EngineError> {
        let product = Product {
            product_id: ProductId::new(),
            name,
            price,
            initial_stock,
            current_stock: initial_stock,
            sale_opens_at,
            version: 0,
        };
        self.seed(product.clone());
        Ok(product)
    }

    async fn decrement_stock(&self, product_id: ProductId) -> Result<(), EngineError> {
        if let Some(p) = self.products.lock().unwrap().get_mut(&product_id) {
            if p.current_stock > 0 {
                p.current_stock -= 1;
            }
        }
        Ok(())
    }
}

pub type SharedProductGateway = Arc<dyn ProductGateway>;

#[cfg(test)]
mod tests {
    use super::*;

    fn product(sale_opens_at: DateTime<Utc>, current_stock: i64) -> Product {
        Product {
            product_id: ProductId::new(),
            name: "flagship-drop".into(),
            price: Decimal::new(9999, 2),
            initial_stock: 100,
            current_stock,
            sale_opens_at,
            version: 0,
        }
    }

    #[test]
    fn status_is_upcoming_before_sale_opens() {
        let now = Utc::now();
        let p = product(now + chrono::Duration::minutes(5), 100);
        assert_eq!(p.status_at(now), ProductStatus::Upcoming);
    }

    #[test]
    fn status_is_sold_out_when_stock_exhausted() {
        let now = Utc::now();
        let p = product(now - chrono::Duration::minutes(5), 0);
        assert_eq!(p.status_at(now), ProductStatus::SoldOut);
    }

    #[test]
    fn status_is_on_sale_otherwise() {
        let now = Utc::now();
        let p = product(now - chrono::Duration::minutes(5), 10);
        assert_eq!(p.status_at(now), ProductStatus::OnSale);
    }

    #[tokio::test]
    async fn fake_gateway_round_trips_created_product() {
        let gw = FakeProductGateway::new();
        let created = gw
            .create("drop".into(), Decimal::new(500, 2), 10, Utc::now())
            .await
            .unwrap();
        let fetched = gw.get(created.product_id).await.unwrap().unwrap();
        assert_eq!(fetched.product_id, created.product_id);
        assert_eq!(fetched.initial_stock, 10);
    }
}
