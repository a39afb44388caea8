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

//! # Ledger API
//!
//! This library provides a transactional double-entry ledger with an HTTP
//! API for user registration, deposits, transfers, withdrawals, balance
//! queries, and aggregate reporting.
//!
//! ## Core Components
//!
//! - [`Store`]: Transactional persistence with exclusive row locks
//! - [`Coordinator`]: Wires the idempotency gate around the posting engine
//! - [`engine`]: Deposit / transfer / withdraw as balanced double-entry postings
//! - [`IdempotencyGate`]: Absorbs request replays without double-posting
//! - [`LedgerError`]: Error kinds with a fixed HTTP mapping
//!
//! ## Example
//!
//! ```
//! use ledger_api_rs::{Coordinator, Currency, Store};
//! use ledger_api_rs::dto::{CreateUserRequest, DepositRequest};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::new());
//! let coordinator = Coordinator::new(Arc::clone(&store), 600);
//!
//! let receipt = coordinator
//!     .create_user(
//!         Some("user-key-1"),
//!         &CreateUserRequest {
//!             email: "alice@example.com".to_string(),
//!             full_name: "Alice".to_string(),
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(receipt.status, 201);
//!
//! let user: ledger_api_rs::dto::UserResponse = serde_json::from_str(&receipt.body).unwrap();
//! let receipt = coordinator
//!     .deposit(
//!         Some("deposit-key-1"),
//!         &DepositRequest {
//!             user_id: user.id,
//!             amount: dec!(150.00),
//!             currency: Currency::Kes,
//!             description: None,
//!             reference: None,
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(receipt.status, 201);
//! ```
//!
//! ## Concurrency
//!
//! Each request runs on its own task; every mutation happens inside one
//! store transaction holding exclusive row locks taken in a deterministic
//! order, so interleaved writers serialize per account and final balances
//! always equal some serial execution.

pub mod account;
pub mod base;
pub mod config;
pub mod coordinator;
pub mod dto;
pub mod engine;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod query;
pub mod registry;
pub mod store;
pub mod transaction;
pub mod user;

pub use account::{Account, AccountStatus, AccountType, Currency, normalize_amount};
pub use base::{AccountId, EntryId, TxnId, UserId};
pub use config::Settings;
pub use coordinator::{Coordinator, WriteReceipt};
pub use error::LedgerError;
pub use http::{AppState, create_router};
pub use idempotency::{Admission, IdempotencyGate, IdempotencyRecord, hash_request_payload};
pub use store::{AccountKey, Store, Tx};
pub use transaction::{
    EntryDirection, LedgerEntry, Transaction, TransactionKind, TransactionStatus,
};
pub use user::User;
