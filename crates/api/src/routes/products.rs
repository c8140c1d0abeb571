//! Catalog administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::ProductId;
use ledger::{CatalogStore, LedgerError, NewProduct, Product, ProductUpdate};

use crate::context::Ctx;
use crate::error::ApiError;
use crate::routes::PageQuery;
use crate::state::AppState;

/// POST /products
#[tracing::instrument(skip(state, ctx, req), fields(name = %req.name))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Json(req): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let catalog = state.coordinator.catalog();
    let product = ctx.bound(catalog.create_product(req)).await??;
    tracing::info!(product_id = %product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /products?page=N
pub async fn list(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let catalog = state.coordinator.catalog();
    let products = ctx.bound(catalog.list_products(query.page())).await??;
    Ok(Json(products))
}

/// GET /products/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    let id = ProductId::new(id);
    ctx.bound(state.coordinator.catalog().get_product(id))
        .await??
        .map(Json)
        .ok_or_else(|| {
            ApiError::Ledger(LedgerError::NotFound {
                entity: "product",
                id: id.as_i64(),
            })
        })
}

/// PUT /products/{id}
#[tracing::instrument(skip(state, ctx, req))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(id): Path<i64>,
    Json(req): Json<ProductUpdate>,
) -> Result<Json<Product>, ApiError> {
    let catalog = state.coordinator.catalog();
    let product = ctx.bound(catalog.update_product(ProductId::new(id), req)).await??;
    Ok(Json(product))
}

/// DELETE /products/{id}
#[tracing::instrument(skip(state, ctx))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let catalog = state.coordinator.catalog();
    ctx.bound(catalog.delete_product(ProductId::new(id))).await??;
    Ok(StatusCode::NO_CONTENT)
}
