//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{DeadlineExceeded, ErrorKind};
use fulfillment::FulfillmentError;
use ledger::LedgerError;
use settlement::SettlementError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// The request deadline passed before storage answered.
    DeadlineExceeded,
    /// Catalog administration error.
    Ledger(LedgerError),
    /// Order placement or status error.
    Fulfillment(FulfillmentError),
    /// Payment settlement error.
    Settlement(SettlementError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorKind::Validation, msg),
            ApiError::DeadlineExceeded => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Transient,
                DeadlineExceeded.to_string(),
            ),
            ApiError::Ledger(err) => (ledger_status(&err), err.kind(), err.to_string()),
            ApiError::Fulfillment(err) => (fulfillment_status(&err), err.kind(), err.to_string()),
            ApiError::Settlement(err) => (settlement_status(&err), err.kind(), err.to_string()),
        };

        match kind {
            ErrorKind::ConsistencyHazard => {
                tracing::error!(error = %message, "request ended in a consistency hazard");
            }
            ErrorKind::Transient => tracing::warn!(error = %message, "dependency unavailable"),
            ErrorKind::Validation | ErrorKind::Resource => {}
        }

        let body = serde_json::json!({ "error": message, "kind": kind.as_str() });
        (status, axum::Json(body)).into_response()
    }
}

fn kind_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Resource => StatusCode::CONFLICT,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ConsistencyHazard => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => kind_status(err.kind()),
    }
}

fn fulfillment_status(err: &FulfillmentError) -> StatusCode {
    match err {
        FulfillmentError::ProductNotFound(_) | FulfillmentError::OrderNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        FulfillmentError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FulfillmentError::Ledger(inner) => ledger_status(inner),
        _ => kind_status(err.kind()),
    }
}

fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::PaymentNotFound(_) | SettlementError::OrderNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SettlementError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::Ledger(inner) => ledger_status(inner),
        _ => kind_status(err.kind()),
    }
}

impl From<DeadlineExceeded> for ApiError {
    fn from(_: DeadlineExceeded) -> Self {
        ApiError::DeadlineExceeded
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError::Settlement(err)
    }
}
