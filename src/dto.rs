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

//! Request and response schemas for the HTTP API.
//!
//! Decimals cross the wire as strings preserving scale, UUIDs as lowercase
//! hyphenated strings, timestamps as ISO-8601. Response bodies are also the
//! exact payloads cached by the idempotency gate, so field order is part of
//! the replay contract.

use crate::account::{Account, AccountStatus, AccountType, Currency};
use crate::base::{AccountId, TxnId, UserId};
use crate::transaction::{Transaction, TransactionKind, TransactionStatus};
use crate::user::User;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// === Requests ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_user_id: UserId,
    pub destination_user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

// === Responses ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at,
            updated_at: user.updated_at,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_active: user.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: TxnId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reference: String,
    pub user_id: Option<UserId>,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub context_data: Map<String, Value>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(txn: &Transaction) -> Self {
        Self {
            id: txn.id,
            created_at: txn.created_at,
            updated_at: txn.updated_at,
            reference: txn.reference.clone(),
            user_id: txn.user_id,
            account_id: txn.account_id,
            kind: txn.kind,
            status: txn.status,
            amount: txn.amount,
            currency: txn.currency,
            description: txn.description.clone(),
            occurred_at: txn.occurred_at,
            context_data: txn.context_data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionListResponse {
    pub items: Vec<TransactionResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: AccountId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Option<UserId>,
    pub name: String,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub status: AccountStatus,
    pub balance: Decimal,
    pub available_balance: Decimal,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            created_at: account.created_at,
            updated_at: account.updated_at,
            user_id: account.user_id,
            name: account.name.clone(),
            currency: account.currency,
            kind: account.kind,
            status: account.status,
            balance: account.balance,
            available_balance: account.available_balance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTotal {
    pub currency: Currency,
    pub balance: Decimal,
    pub available_balance: Decimal,
}

impl CurrencyTotal {
    pub fn zero(currency: Currency) -> Self {
        Self {
            currency,
            balance: Decimal::new(0, 2),
            available_balance: Decimal::new(0, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalanceResponse {
    pub user_id: UserId,
    pub accounts: Vec<AccountResponse>,
    pub totals: Vec<CurrencyTotal>,
}

/// Aggregate dashboard figures. Amounts are widened to floats for display
/// only; the stored rows stay fixed-point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSummaryResponse {
    pub total_users: usize,
    pub total_wallet_value: f64,
    pub total_deposits: usize,
    pub total_transfers: usize,
    pub total_withdrawals: usize,
    pub total_deposits_amount: f64,
    pub total_transfers_amount: f64,
    pub total_withdrawals_amount: f64,
}

/// Error body shared by every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
