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

//! Read paths: user listings, transaction listings, and the admin summary.
//!
//! Reads bypass the idempotency gate and see committed state only.

use crate::base::UserId;
use crate::dto::{AdminSummaryResponse, TransactionListResponse, TransactionResponse, UserListResponse, UserResponse};
use crate::store::Store;
use crate::transaction::{Transaction, TransactionKind, TransactionStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Filters for the transaction listing endpoint.
///
/// `user_id` matches transactions attributed to the user or anchored on one
/// of the user's accounts. Date bounds are inclusive calendar dates against
/// `occurred_at`. The `total` of a listing reflects the user/type/status
/// filters but not the date bounds.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<UserId>,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub fn list_users(store: &Store, limit: Option<usize>, offset: Option<usize>) -> UserListResponse {
    let limit = clamp_limit(limit);
    let offset = offset.unwrap_or(0);
    let items = store
        .list_users(limit, offset)
        .iter()
        .map(UserResponse::from)
        .collect();
    UserListResponse {
        items,
        total: store.count_users(),
    }
}

pub fn get_user(store: &Store, user_id: UserId) -> Option<UserResponse> {
    store.get_user(user_id).map(|user| UserResponse::from(&user))
}

pub fn list_transactions(store: &Store, filter: &TransactionFilter) -> TransactionListResponse {
    let limit = clamp_limit(filter.limit);
    let offset = filter.offset.unwrap_or(0);

    let owner_accounts: Vec<_> = filter
        .user_id
        .map(|user_id| store.user_accounts(user_id).iter().map(|a| a.id).collect())
        .unwrap_or_default();

    let matches_base = |txn: &Transaction| {
        if let Some(user_id) = filter.user_id {
            let attributed = txn.user_id == Some(user_id) || owner_accounts.contains(&txn.account_id);
            if !attributed {
                return false;
            }
        }
        if let Some(kind) = filter.kind {
            if txn.kind != kind {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if txn.status != status {
                return false;
            }
        }
        true
    };

    let all = store.transactions_newest_first();
    let total = all.iter().filter(|txn| matches_base(txn)).count();

    let items = all
        .iter()
        .filter(|txn| matches_base(txn))
        .filter(|txn| {
            let day = txn.occurred_at.date_naive();
            if let Some(start) = filter.start_date {
                if day < start {
                    return false;
                }
            }
            if let Some(end) = filter.end_date {
                if day > end {
                    return false;
                }
            }
            true
        })
        .skip(offset)
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    TransactionListResponse { items, total }
}

/// Aggregate figures for the admin dashboard, folded server-side over the
/// committed rows and widened to floats at the response boundary.
pub fn admin_summary(store: &Store) -> AdminSummaryResponse {
    let accounts = store.accounts_snapshot();
    // Wallet value counts every account, system accounts included.
    let total_wallet_value: Decimal = accounts.iter().map(|a| a.balance).sum();

    let transactions = store.transactions_newest_first();
    let count_of = |kind: TransactionKind| transactions.iter().filter(|t| t.kind == kind).count();
    let amount_of = |kind: TransactionKind| {
        let sum: Decimal = transactions
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.amount)
            .sum();
        sum.to_f64().unwrap_or_default()
    };

    AdminSummaryResponse {
        total_users: store.count_users(),
        total_wallet_value: total_wallet_value.to_f64().unwrap_or_default(),
        total_deposits: count_of(TransactionKind::Deposit),
        total_transfers: count_of(TransactionKind::Transfer),
        total_withdrawals: count_of(TransactionKind::Withdrawal),
        total_deposits_amount: amount_of(TransactionKind::Deposit),
        total_transfers_amount: amount_of(TransactionKind::Transfer),
        total_withdrawals_amount: amount_of(TransactionKind::Withdrawal),
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}
