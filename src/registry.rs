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

//! Account registry: locates or materializes user, treasury, and external
//! accounts per (owner, currency).
//!
//! Creation is race-safe: each uniqueness key has a synthetic lock row that
//! the transaction holds until commit, so two writers materializing the same
//! wallet serialize and the loser sees the winner's account.

use crate::account::{Account, AccountType, Currency};
use crate::base::UserId;
use crate::dto::{AccountResponse, CurrencyTotal, UserBalanceResponse};
use crate::error::LedgerError;
use crate::store::{AccountKey, Store, Tx};
use std::collections::BTreeMap;

/// Returns the user's wallet for `currency`, creating it on first use.
pub fn get_or_create_user_account(
    tx: &mut Tx<'_>,
    user_id: UserId,
    currency: Currency,
) -> Result<Account, LedgerError> {
    if tx.get_user(user_id).is_none() {
        return Err(LedgerError::NotFound("user"));
    }
    let key = AccountKey::User(user_id, currency);
    if let Some(id) = tx.lock_account_key(&key) {
        return tx
            .get_account(id)
            .ok_or(LedgerError::Internal("account index points at missing row"));
    }
    let account = Account::new(
        Some(user_id),
        format!("{} Wallet", currency.code()),
        currency,
        AccountType::User,
        tx.now(),
    );
    tx.insert_account(&key, account.clone())?;
    Ok(account)
}

/// Returns the per-currency treasury account, creating it on first use.
pub fn get_or_create_treasury_account(
    tx: &mut Tx<'_>,
    currency: Currency,
) -> Result<Account, LedgerError> {
    get_or_create_system_account(
        tx,
        AccountType::Treasury,
        currency,
        format!("Treasury {}", currency.code()),
    )
}

/// Returns the per-currency external settlement account, creating it on
/// first use.
pub fn get_or_create_external_account(
    tx: &mut Tx<'_>,
    currency: Currency,
) -> Result<Account, LedgerError> {
    get_or_create_system_account(
        tx,
        AccountType::External,
        currency,
        format!("External Settlement {}", currency.code()),
    )
}

fn get_or_create_system_account(
    tx: &mut Tx<'_>,
    kind: AccountType,
    currency: Currency,
    name: String,
) -> Result<Account, LedgerError> {
    let key = AccountKey::System(kind, currency);
    if let Some(id) = tx.lock_account_key(&key) {
        return tx
            .get_account(id)
            .ok_or(LedgerError::Internal("account index points at missing row"));
    }
    let account = Account::new(None, name, currency, kind, tx.now());
    tx.insert_account(&key, account.clone())?;
    Ok(account)
}

/// Read-only summary of a user's wallets with per-currency totals.
///
/// An unknown user simply has no wallets yet, so the summary comes back
/// empty rather than failing.
pub fn user_balance_summary(store: &Store, user_id: UserId) -> UserBalanceResponse {
    let accounts = store.user_accounts(user_id);
    let mut totals: BTreeMap<Currency, CurrencyTotal> = BTreeMap::new();
    for account in &accounts {
        let total = totals
            .entry(account.currency)
            .or_insert_with(|| CurrencyTotal::zero(account.currency));
        total.balance += account.balance;
        total.available_balance += account.available_balance;
    }
    UserBalanceResponse {
        user_id,
        accounts: accounts.iter().map(AccountResponse::from).collect(),
        totals: totals.into_values().collect(),
    }
}
