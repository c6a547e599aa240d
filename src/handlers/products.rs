//! Catalog HTTP handlers.
//!
//! Public:
//! - GET /api/v1/categories
//! - GET /api/v1/products?category_id=...
//! - GET /api/v1/products/{id}
//!
//! Admin:
//! - POST /api/v1/admin/categories
//! - POST /api/v1/admin/products
//! - PUT /api/v1/admin/products/{id}

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::product::{
        Category, CreateCategoryRequest, CreateProductRequest, Product, UpdateProductRequest,
    },
    services::catalog_service,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub category_id: Option<Uuid>,
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, AppError> {
    let categories = catalog_service::list_categories(&state.pool, &state.catalog).await?;
    Ok(Json(categories))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<Product>>, AppError> {
    let products =
        catalog_service::list_active_products(&state.pool, &state.catalog, query.category_id)
            .await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Product>, AppError> {
    let product = catalog_service::get_product(&state.pool, &state.catalog, product_id).await?;
    Ok(Json(product))
}

pub async fn create_category(
    State(state): State<AppState>,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    let category = catalog_service::create_category(&state.pool, &state.catalog, request).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// Create a product.
///
/// # Request Body
///
/// ```json
/// {
///   "category_id": "550e8400-...",
///   "name": "86 Diamonds",
///   "price": "20000.00",
///   "instant_fulfillment": true
/// }
/// ```
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let product = catalog_service::create_product(&state.pool, &state.catalog, request).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<Product>, AppError> {
    let product =
        catalog_service::update_product(&state.pool, &state.catalog, product_id, request).await?;
    Ok(Json(product))
}
