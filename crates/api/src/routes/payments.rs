//! Direct settlement endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Money, PaymentId};
use ledger::Payment;
use serde::Deserialize;
use settlement::{SettleRequest, TransactionOutcome};

use crate::context::Ctx;
use crate::error::ApiError;
use crate::routes::PageQuery;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TransactionRequest {
    /// Amount tendered, in cents.
    pub amount: Money,
}

/// POST /payments: opens a pending payment for a pending order.
#[tracing::instrument(skip(state, ctx, req), fields(order_id = %req.order_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Json(req): Json<SettleRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let payment = state.worker.settle(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// GET /payments?page=N
pub async fn list(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let payments = state.worker.list_payments(&ctx, query.page()).await?;
    Ok(Json(payments))
}

/// GET /payments/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(id): Path<i64>,
) -> Result<Json<Payment>, ApiError> {
    let payment = state.worker.get_payment(&ctx, PaymentId::new(id)).await?;
    Ok(Json(payment))
}

/// POST /payments/{id}/transaction: settles a payment with the tendered amount.
///
/// A payment that is already terminal answers 200 with outcome
/// `already_settled`; too little money answers 422 and fails the order.
#[tracing::instrument(skip(state, ctx, req))]
pub async fn transaction(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(id): Path<i64>,
    Json(req): Json<TransactionRequest>,
) -> Result<Json<TransactionOutcome>, ApiError> {
    let outcome = state
        .worker
        .transaction(&ctx, PaymentId::new(id), req.amount)
        .await?;
    Ok(Json(outcome))
}
