//! Catalog service - categories and products.
//!
//! Public listings are read through [`CatalogCache`]; every admin write clears
//! it. Purchases always load the product from the database.

use std::time::Duration;

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::product::{
        Category, CreateCategoryRequest, CreateProductRequest, Product, ProductStatus,
        UpdateProductRequest,
    },
    services::{cache::TtlCache, voucher_service::round_money},
};

const ALL_ACTIVE: &str = "active";

/// Listings kept per cache: the full listing plus one per category.
const MAX_CACHED_LISTINGS: usize = 256;

#[derive(Clone)]
pub struct CatalogCache {
    products: TtlCache<Vec<Product>>,
    categories: TtlCache<Vec<Category>>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            products: TtlCache::new(ttl, MAX_CACHED_LISTINGS),
            categories: TtlCache::new(ttl, 1),
        }
    }

    pub async fn invalidate(&self) {
        self.products.clear().await;
        self.categories.clear().await;
    }
}

/// Active categories ordered by name.
pub async fn list_categories(pool: &DbPool, cache: &CatalogCache) -> Result<Vec<Category>, AppError> {
    if let Some(categories) = cache.categories.get(ALL_ACTIVE).await {
        return Ok(categories);
    }

    let categories = sqlx::query_as::<_, Category>(
        "SELECT * FROM categories WHERE is_active = true ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    cache.categories.set(ALL_ACTIVE, categories.clone()).await;
    Ok(categories)
}

/// Active products, optionally limited to one category.
pub async fn list_active_products(
    pool: &DbPool,
    cache: &CatalogCache,
    category_id: Option<Uuid>,
) -> Result<Vec<Product>, AppError> {
    let key = match category_id {
        Some(id) => format!("category:{id}"),
        None => ALL_ACTIVE.to_string(),
    };

    if let Some(products) = cache.products.get(&key).await {
        return Ok(products);
    }

    let products = sqlx::query_as::<_, Product>(
        r#"
        SELECT p.* FROM products p
        JOIN categories c ON c.id = p.category_id
        WHERE p.status = 'active'
          AND c.is_active = true
          AND ($1::uuid IS NULL OR p.category_id = $1)
        ORDER BY p.display_order, p.name
        "#,
    )
    .bind(category_id)
    .fetch_all(pool)
    .await?;

    if is_cacheable_listing(category_id, &products) {
        cache.products.set(key, products.clone()).await;
    }
    Ok(products)
}

/// A category listing is cached only when it has products, so arbitrary ids
/// from the query string cannot fill the cache.
fn is_cacheable_listing(category_id: Option<Uuid>, products: &[Product]) -> bool {
    category_id.is_none() || !products.is_empty()
}

/// A single product for display. Served from the cached listing when present.
pub async fn get_product(
    pool: &DbPool,
    cache: &CatalogCache,
    product_id: Uuid,
) -> Result<Product, AppError> {
    if let Some(product) = cache
        .products
        .get(ALL_ACTIVE)
        .await
        .and_then(|products| products.into_iter().find(|p| p.id == product_id))
    {
        return Ok(product);
    }

    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::ProductNotFound)
}

/// Load a product for checkout, bypassing the cache.
///
/// # Errors
///
/// - `ProductNotFound`
/// - `ProductInactive`: product is not `active`
pub async fn load_product_for_purchase(pool: &DbPool, product_id: Uuid) -> Result<Product, AppError> {
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::ProductNotFound)?;

    if product.status != ProductStatus::Active {
        return Err(AppError::ProductInactive);
    }

    Ok(product)
}

pub async fn create_category(
    pool: &DbPool,
    cache: &CatalogCache,
    request: CreateCategoryRequest,
) -> Result<Category, AppError> {
    let name = require_name(&request.name)?;
    let slug = slug_for(request.slug.as_deref(), name)?;

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name, slug) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(&slug)
    .fetch_one(pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Category slug {slug} already exists")),
        other => other,
    })?;

    cache.invalidate().await;
    tracing::info!(category_id = %category.id, slug = %category.slug, "category created");
    Ok(category)
}

pub async fn create_product(
    pool: &DbPool,
    cache: &CatalogCache,
    request: CreateProductRequest,
) -> Result<Product, AppError> {
    let name = require_name(&request.name)?;
    require_price(request.price)?;

    let slug = slug_for(request.slug.as_deref(), name)?;

    let category_exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1)")
            .bind(request.category_id)
            .fetch_one(pool)
            .await?;
    if !category_exists {
        return Err(AppError::CategoryNotFound);
    }

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (
            category_id, name, slug, description, price, instant_fulfillment, display_order
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(request.category_id)
    .bind(name)
    .bind(&slug)
    .bind(request.description)
    .bind(round_money(request.price))
    .bind(request.instant_fulfillment)
    .bind(request.display_order)
    .fetch_one(pool)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Product slug {slug} already exists")),
        other => other,
    })?;

    cache.invalidate().await;
    tracing::info!(product_id = %product.id, slug = %product.slug, "product created");
    Ok(product)
}

/// Partial product update. Price changes never touch existing transactions,
/// which keep the price captured at creation.
pub async fn update_product(
    pool: &DbPool,
    cache: &CatalogCache,
    product_id: Uuid,
    request: UpdateProductRequest,
) -> Result<Product, AppError> {
    if let Some(name) = &request.name {
        require_name(name)?;
    }
    if let Some(price) = request.price {
        require_price(price)?;
    }

    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            price = COALESCE($4, price),
            status = COALESCE($5, status),
            instant_fulfillment = COALESCE($6, instant_fulfillment),
            display_order = COALESCE($7, display_order),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(product_id)
    .bind(request.name.as_deref().map(str::trim))
    .bind(request.description)
    .bind(request.price.map(round_money))
    .bind(request.status)
    .bind(request.instant_fulfillment)
    .bind(request.display_order)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::ProductNotFound)?;

    cache.invalidate().await;
    tracing::info!(product_id = %product.id, "product updated");
    Ok(product)
}

/// Lowercase ASCII slug: runs of anything but letters and digits become one `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Explicit slug if given, otherwise derived from the name.
fn slug_for(explicit: Option<&str>, name: &str) -> Result<String, AppError> {
    let slug = slugify(explicit.unwrap_or(name));
    if slug.is_empty() {
        return Err(AppError::ValidationFailed(
            "Slug must contain letters or digits".to_string(),
        ));
    }
    Ok(slug)
}

fn require_name(name: &str) -> Result<&str, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::ValidationFailed("Name is required".to_string()));
    }
    Ok(name)
}

fn require_price(price: rust_decimal::Decimal) -> Result<(), AppError> {
    if price.is_sign_negative() {
        return Err(AppError::ValidationFailed(
            "Price cannot be negative".to_string(),
        ));
    }
    Ok(())
}
