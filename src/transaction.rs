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

//! Transactions and their paired ledger entries.
//!
//! Every completed transaction owns exactly two ledger entries of equal
//! amount and opposite direction; a CREDIT raises the target account's
//! balance and a DEBIT lowers it.

use crate::base::{AccountId, EntryId, TxnId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Transfer,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

/// Financial transaction recorded in the ledger.
///
/// `reference` is a globally unique human-readable token, client-supplied or
/// server-generated. `account_id` anchors the transaction to its primary
/// account (the user wallet for deposits and withdrawals, the source for
/// transfers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub reference: String,
    pub user_id: Option<UserId>,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub currency: crate::account::Currency,
    pub description: Option<String>,
    pub context_data: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Option<UserId>,
        account_id: AccountId,
        kind: TransactionKind,
        amount: Decimal,
        currency: crate::account::Currency,
        description: Option<String>,
        context_data: Map<String, Value>,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TxnId::random(),
            reference: reference.unwrap_or_else(generate_reference),
            user_id,
            account_id,
            kind,
            status: TransactionStatus::Completed,
            amount,
            currency,
            description,
            context_data,
            occurred_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Server-generated reference token: 32 lowercase hex characters.
pub fn generate_reference() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Double-entry bookkeeping record tied to a transaction.
///
/// `balance_after` and `available_balance_after` capture the account balances
/// as observed under the posting's row lock, immediately after this entry's
/// contribution was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub transaction_id: TxnId,
    pub account_id: AccountId,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub available_balance_after: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        transaction_id: TxnId,
        account_id: AccountId,
        direction: EntryDirection,
        amount: Decimal,
        balance_after: Decimal,
        available_balance_after: Decimal,
        note: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::random(),
            transaction_id,
            account_id,
            direction,
            amount,
            balance_after,
            available_balance_after,
            note: Some(note.to_string()),
            created_at: now,
        }
    }

    /// Signed contribution of this entry: positive for CREDIT.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}
