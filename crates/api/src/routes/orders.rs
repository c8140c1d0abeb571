//! Order placement and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use fulfillment::{LineItem, OrderRequest, PlacedOrder};
use ledger::Order;
use serde::Deserialize;

use crate::context::Ctx;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    /// Buyer. Taken from the `x-user-id` header when present.
    pub user_id: Option<UserId>,
    pub items: Vec<LineItem>,
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: Option<UserId>,
    pub page: Option<u32>,
}

/// POST /orders: places an order.
///
/// Answers 201 with the pending order. When the order could not be announced
/// for settlement yet, the body carries a `warning`.
#[tracing::instrument(skip(state, ctx, req), fields(lines = req.items.len()))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), ApiError> {
    let user_id = match (ctx.caller(), req.user_id) {
        (Some(caller), Some(requested)) if caller != requested => {
            return Err(ApiError::BadRequest(format!(
                "user_id {requested} does not match the authenticated caller"
            )));
        }
        (Some(caller), _) => caller,
        (None, Some(requested)) => requested,
        (None, None) => return Err(ApiError::BadRequest("user_id is required".to_string())),
    };

    let placed = state
        .coordinator
        .create_order(
            &ctx,
            OrderRequest {
                user_id,
                items: req.items,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(placed)))
}

/// GET /orders?user_id=N&page=N
pub async fn list(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state
        .coordinator
        .list_orders(&ctx, query.user_id, query.page.unwrap_or(1))
        .await?;
    Ok(Json(orders))
}

/// GET /orders/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(id): Path<i64>,
) -> Result<Json<Order>, ApiError> {
    let order = state.coordinator.get_order(&ctx, OrderId::new(id)).await?;
    Ok(Json(order))
}
