//! # Catalog Repository
//!
//! Read model over the catalog tables. The catalog itself (CRUD forms,
//! images, suppliers) is owned by the admin subsystem; the engine only needs
//! to resolve a cart line into a concrete price at commit time.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// A product row as the engine sees it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub is_active: bool,
}

/// A variant row: identity plus price modifier relative to the base price.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub price_modifier_cents: i64,
}

/// The price components for one resolved cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPrice {
    pub unit_base_price_cents: i64,
    pub variant_modifier_cents: i64,
}

/// Repository for catalog lookups.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Gets a product by ID.
    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, price_cents, is_active
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Resolves a cart line into its price components.
    ///
    /// Returns `None` when the product is missing/inactive, the variant is
    /// missing, or the variant does not belong to the product. The committer
    /// turns `None` into a validation failure before anything is touched.
    pub async fn resolve_price(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> DbResult<Option<ResolvedPrice>> {
        let Some(product) = self.get_product(product_id).await? else {
            return Ok(None);
        };
        if !product.is_active {
            return Ok(None);
        }

        let modifier = match variant_id {
            None => 0,
            Some(vid) => {
                let variant = sqlx::query_as::<_, ProductVariant>(
                    r#"
                    SELECT id, product_id, name, price_modifier_cents
                    FROM product_variants
                    WHERE id = ?1 AND product_id = ?2
                    "#,
                )
                .bind(vid)
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;

                match variant {
                    Some(v) => v.price_modifier_cents,
                    None => return Ok(None),
                }
            }
        };

        Ok(Some(ResolvedPrice {
            unit_base_price_cents: product.price_cents,
            variant_modifier_cents: modifier,
        }))
    }

    /// Inserts a product (used by the catalog collaborator and tests).
    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Inserting product");

        let result = sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, is_active)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.is_active)
        .execute(&self.pool)
        .await;

        result.map_err(DbError::from)?;
        Ok(())
    }

    /// Inserts a variant (used by the catalog collaborator and tests).
    pub async fn insert_variant(&self, variant: &ProductVariant) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_variants (id, product_id, name, price_modifier_cents)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&variant.id)
        .bind(&variant.product_id)
        .bind(&variant.name)
        .bind(variant.price_modifier_cents)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn product(id: &str, price_cents: i64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            price_cents,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_resolve_plain_product() {
        let db = db().await;
        db.catalog().insert_product(&product("p1", 1000)).await.unwrap();

        let resolved = db.catalog().resolve_price("p1", None).await.unwrap().unwrap();
        assert_eq!(resolved.unit_base_price_cents, 1000);
        assert_eq!(resolved.variant_modifier_cents, 0);
    }

    #[tokio::test]
    async fn test_resolve_with_variant_modifier() {
        let db = db().await;
        db.catalog().insert_product(&product("p1", 1000)).await.unwrap();
        db.catalog()
            .insert_variant(&ProductVariant {
                id: "v1".to_string(),
                product_id: "p1".to_string(),
                name: "Large".to_string(),
                price_modifier_cents: 250,
            })
            .await
            .unwrap();

        let resolved = db
            .catalog()
            .resolve_price("p1", Some("v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.unit_base_price_cents, 1000);
        assert_eq!(resolved.variant_modifier_cents, 250);
    }

    #[tokio::test]
    async fn test_unknown_product_resolves_to_none() {
        let db = db().await;
        assert!(db.catalog().resolve_price("ghost", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_variant_must_belong_to_product() {
        let db = db().await;
        db.catalog().insert_product(&product("p1", 1000)).await.unwrap();
        db.catalog().insert_product(&product("p2", 2000)).await.unwrap();
        db.catalog()
            .insert_variant(&ProductVariant {
                id: "v1".to_string(),
                product_id: "p1".to_string(),
                name: "Large".to_string(),
                price_modifier_cents: 250,
            })
            .await
            .unwrap();

        // v1 belongs to p1, not p2
        assert!(db
            .catalog()
            .resolve_price("p2", Some("v1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_inactive_product_resolves_to_none() {
        let db = db().await;
        let mut p = product("p1", 1000);
        p.is_active = false;
        db.catalog().insert_product(&p).await.unwrap();

        assert!(db.catalog().resolve_price("p1", None).await.unwrap().is_none());
    }
}
