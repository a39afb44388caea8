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

//! Posting engine: deposits, transfers, and withdrawals as balanced
//! double-entry postings.
//!
//! Every operation runs inside the caller's transaction and follows the same
//! shape: resolve accounts, take exclusive row locks in sorted-id order,
//! validate against the post-lock snapshots, mutate, then record one
//! transaction with exactly one CREDIT and one DEBIT ledger entry of equal
//! amount. A CREDIT raises the target account's balance, a DEBIT lowers it;
//! treasury and external offsets keep the books balanced across the system.
//!
//! # Errors
//!
//! Any precondition failure leaves the transaction dirty; the coordinator
//! rolls it back, so a failed posting has no durable effect.

use crate::account::{Account, Currency, normalize_amount};
use crate::base::{AccountId, UserId};
use crate::error::LedgerError;
use crate::registry;
use crate::store::Tx;
use crate::transaction::{EntryDirection, LedgerEntry, Transaction, TransactionKind};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::debug;

/// Credits a user's wallet from the currency's treasury.
pub fn deposit(
    tx: &mut Tx<'_>,
    user_id: UserId,
    amount: Decimal,
    currency: Currency,
    description: Option<String>,
    reference: Option<String>,
) -> Result<Transaction, LedgerError> {
    let amount = normalize_amount(amount)?;

    let user_account = registry::get_or_create_user_account(tx, user_id, currency)?;
    let treasury = registry::get_or_create_treasury_account(tx, currency)?;

    let (mut user_account, mut treasury) = lock_pair(tx, user_account.id, treasury.id)?;

    user_account.credit(amount)?;
    treasury.credit(amount)?;

    tx.update_account(user_account.clone())?;
    tx.update_account(treasury.clone())?;

    let txn = Transaction::new(
        Some(user_id),
        user_account.id,
        TransactionKind::Deposit,
        amount,
        currency,
        description,
        context(&[("treasury_account_id", treasury.id.to_string())]),
        reference,
        tx.now(),
    );
    tx.insert_transaction(txn.clone())?;

    tx.insert_entry(LedgerEntry::new(
        txn.id,
        user_account.id,
        EntryDirection::Credit,
        amount,
        user_account.balance,
        user_account.available_balance,
        "Deposit credit",
        tx.now(),
    ));
    tx.insert_entry(LedgerEntry::new(
        txn.id,
        treasury.id,
        EntryDirection::Debit,
        amount,
        treasury.balance,
        treasury.available_balance,
        "Deposit offset",
        tx.now(),
    ));

    debug!(%user_id, %amount, %currency, reference = %txn.reference, "deposit posted");
    Ok(txn)
}

/// Moves funds between two accounts of the same currency.
pub fn transfer(
    tx: &mut Tx<'_>,
    source_account_id: AccountId,
    destination_account_id: AccountId,
    amount: Decimal,
    currency: Currency,
    description: Option<String>,
    reference: Option<String>,
) -> Result<Transaction, LedgerError> {
    if source_account_id == destination_account_id {
        return Err(LedgerError::SameAccount);
    }
    let amount = normalize_amount(amount)?;

    let (mut source, mut destination) = lock_pair(tx, source_account_id, destination_account_id)?;

    if source.currency != currency || destination.currency != currency {
        return Err(LedgerError::CurrencyMismatch);
    }

    source.debit(amount)?;
    destination.credit(amount)?;

    tx.update_account(source.clone())?;
    tx.update_account(destination.clone())?;

    let txn = Transaction::new(
        source.user_id,
        source.id,
        TransactionKind::Transfer,
        amount,
        currency,
        description,
        context(&[("destination_account_id", destination.id.to_string())]),
        reference,
        tx.now(),
    );
    tx.insert_transaction(txn.clone())?;

    tx.insert_entry(LedgerEntry::new(
        txn.id,
        source.id,
        EntryDirection::Debit,
        amount,
        source.balance,
        source.available_balance,
        "Transfer debit",
        tx.now(),
    ));
    tx.insert_entry(LedgerEntry::new(
        txn.id,
        destination.id,
        EntryDirection::Credit,
        amount,
        destination.balance,
        destination.available_balance,
        "Transfer credit",
        tx.now(),
    ));

    debug!(
        source = %source.id,
        destination = %destination.id,
        %amount,
        %currency,
        reference = %txn.reference,
        "transfer posted"
    );
    Ok(txn)
}

/// Debits a user's wallet into the currency's external settlement account.
pub fn withdraw(
    tx: &mut Tx<'_>,
    user_id: UserId,
    amount: Decimal,
    currency: Currency,
    description: Option<String>,
    reference: Option<String>,
) -> Result<Transaction, LedgerError> {
    let amount = normalize_amount(amount)?;

    let user_account = registry::get_or_create_user_account(tx, user_id, currency)?;
    let external = registry::get_or_create_external_account(tx, currency)?;

    let (mut user_account, mut external) = lock_pair(tx, user_account.id, external.id)?;

    user_account.debit(amount)?;
    external.credit(amount)?;

    tx.update_account(user_account.clone())?;
    tx.update_account(external.clone())?;

    let txn = Transaction::new(
        Some(user_id),
        user_account.id,
        TransactionKind::Withdrawal,
        amount,
        currency,
        description,
        context(&[("external_account_id", external.id.to_string())]),
        reference,
        tx.now(),
    );
    tx.insert_transaction(txn.clone())?;

    tx.insert_entry(LedgerEntry::new(
        txn.id,
        user_account.id,
        EntryDirection::Debit,
        amount,
        user_account.balance,
        user_account.available_balance,
        "Withdrawal debit",
        tx.now(),
    ));
    tx.insert_entry(LedgerEntry::new(
        txn.id,
        external.id,
        EntryDirection::Credit,
        amount,
        external.balance,
        external.available_balance,
        "Withdrawal offset",
        tx.now(),
    ));

    debug!(%user_id, %amount, %currency, reference = %txn.reference, "withdrawal posted");
    Ok(txn)
}

/// Locks both accounts in sorted-id order and returns them in argument
/// order. The sorted acquisition prevents lock-order deadlocks between
/// concurrent postings over overlapping accounts.
fn lock_pair(
    tx: &mut Tx<'_>,
    first: AccountId,
    second: AccountId,
) -> Result<(Account, Account), LedgerError> {
    let (lo, hi) = if first <= second { (first, second) } else { (second, first) };
    let lo_account = tx.lock_account(lo)?;
    let hi_account = tx.lock_account(hi)?;
    if lo == first {
        Ok((lo_account, hi_account))
    } else {
        Ok((hi_account, lo_account))
    }
}

fn context(pairs: &[(&str, String)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect()
}
