// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! REST API surface for the ledger service.
//!
//! ## Endpoints
//!
//! - `POST /api/users` - Register a user (idempotent)
//! - `GET  /api/users` - List users
//! - `GET  /api/users/{id}` - Get a user
//! - `POST /api/ledger/deposit` - Deposit into a wallet (idempotent)
//! - `POST /api/ledger/transfer` - Transfer between users (idempotent)
//! - `POST /api/ledger/withdraw` - Withdraw from a wallet (idempotent)
//! - `GET  /api/ledger/balance/{user_id}` - Per-currency balance summary
//! - `GET  /api/transactions` - Filtered transaction listing
//! - `GET  /api/dashboard/admin` - Aggregate summary
//!
//! Every write requires an `Idempotency-Key` header; replays of a settled
//! key re-emit the original status code and body verbatim.

use crate::base::UserId;
use crate::coordinator::{Coordinator, WriteReceipt};
use crate::dto::{
    CreateUserRequest, DepositRequest, ErrorResponse, TransferRequest, UserBalanceResponse,
    WithdrawalRequest,
};
use crate::error::LedgerError;
use crate::query::{self, TransactionFilter};
use crate::registry;
use crate::store::Store;
use crate::transaction::{TransactionKind, TransactionStatus};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Shared application state: the store and the write coordinator.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(store: Arc<Store>, idempotency_ttl_seconds: u64) -> Self {
        let coordinator = Arc::new(Coordinator::new(Arc::clone(&store), idempotency_ttl_seconds));
        Self { store, coordinator }
    }
}

// === Error handling ===

/// Wrapper for converting [`LedgerError`] into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::MissingIdempotencyKey => {
                (StatusCode::BAD_REQUEST, "MISSING_IDEMPOTENCY_KEY")
            }
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::SameAccount => (StatusCode::BAD_REQUEST, "SAME_ACCOUNT"),
            LedgerError::CurrencyMismatch => (StatusCode::BAD_REQUEST, "CURRENCY_MISMATCH"),
            LedgerError::InsufficientFunds => (StatusCode::BAD_REQUEST, "INSUFFICIENT_FUNDS"),
            LedgerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            LedgerError::IdempotencyConflict => (StatusCode::CONFLICT, "IDEMPOTENCY_CONFLICT"),
            LedgerError::UniqueViolation(_) => (StatusCode::CONFLICT, "UNIQUE_VIOLATION"),
            LedgerError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            LedgerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Re-emits a coordinator receipt: the stored status code with the exact
/// cached JSON body.
fn receipt_response(receipt: WriteReceipt) -> Response {
    let status =
        StatusCode::from_u16(receipt.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        receipt.body,
    )
        .into_response()
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> Result<Response, AppError> {
    let key = idempotency_key(&headers);
    let receipt = state.coordinator.create_user(key.as_deref(), &request)?;
    Ok(receipt_response(receipt))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> impl IntoResponse {
    Json(query::list_users(&state.store, page.limit, page.offset))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let user = query::get_user(&state.store, UserId(user_id))
        .ok_or(LedgerError::NotFound("user"))?;
    Ok(Json(user).into_response())
}

async fn deposit_funds(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DepositRequest>,
) -> Result<Response, AppError> {
    let key = idempotency_key(&headers);
    let receipt = state.coordinator.deposit(key.as_deref(), &request)?;
    Ok(receipt_response(receipt))
}

async fn transfer_funds(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<Response, AppError> {
    let key = idempotency_key(&headers);
    let receipt = state.coordinator.transfer(key.as_deref(), &request)?;
    Ok(receipt_response(receipt))
}

async fn withdraw_funds(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<WithdrawalRequest>,
) -> Result<Response, AppError> {
    let key = idempotency_key(&headers);
    let receipt = state.coordinator.withdraw(key.as_deref(), &request)?;
    Ok(receipt_response(receipt))
}

async fn get_user_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Json<UserBalanceResponse> {
    Json(registry::user_balance_summary(&state.store, UserId(user_id)))
}

#[derive(Debug, Deserialize)]
struct TransactionQuery {
    user_id: Option<Uuid>,
    #[serde(rename = "type")]
    kind: Option<TransactionKind>,
    status: Option<TransactionStatus>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionQuery>,
) -> impl IntoResponse {
    let filter = TransactionFilter {
        user_id: params.user_id.map(UserId),
        kind: params.kind,
        status: params.status,
        start_date: params.start_date,
        end_date: params.end_date,
        limit: params.limit,
        offset: params.offset,
    };
    Json(query::list_transactions(&state.store, &filter))
}

async fn admin_summary(State(state): State<AppState>) -> impl IntoResponse {
    Json(query::admin_summary(&state.store))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/{id}", get(get_user))
        .route("/api/ledger/deposit", post(deposit_funds))
        .route("/api/ledger/transfer", post(transfer_funds))
        .route("/api/ledger/withdraw", post(withdraw_funds))
        .route("/api/ledger/balance/{user_id}", get(get_user_balance))
        .route("/api/transactions", get(list_transactions))
        .route("/api/dashboard/admin", get(admin_summary))
        .with_state(state)
}
